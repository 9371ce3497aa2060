// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events: pooled buffers plus the metadata stations select on.
//!
//! # Ownership
//!
//! ```text
//!   EventPool (all cells, allocated once)
//!       |
//!       +-- Event handle --> exactly one holder at a time:
//!              - an EventList (station input/output)
//!              - a conductor batch in flight
//!              - an attachment (owner = Attachment(id))
//! ```
//!
//! An [`Event`] is a move-only handle onto a pool cell. The pool keeps its own
//! reference to every cell so the system can reclaim events still checked out
//! by an attachment that went away.

pub mod list;
pub mod pool;

use crate::attachment::AttachmentId;
use crate::error::{Error, Result};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

pub use list::{EventList, ListCounters, WaitMode};
pub use pool::{Census, EventPool};

/// Number of selection control words carried by every event.
pub const CONTROL_WORDS: usize = 6;

/// Byte-order tag of an event whose payload is in the producer's native order.
pub const BYTE_ORDER_NATIVE: u32 = 0x04030201;

/// Byte-order tag after the payload has been swapped.
pub const BYTE_ORDER_SWAPPED: u32 = 0x01020304;

/// Mask of the priority bit in a packed priority/status word.
pub const PRIORITY_MASK: u32 = 0x1;
/// Mask of the data-status bits in a packed priority/status word.
pub const DATA_MASK: u32 = 0x30;
/// Shift of the data-status bits in a packed priority/status word.
pub const DATA_SHIFT: u32 = 4;

/// Control words of an event, also used as station select words.
pub type ControlWords = [i32; CONTROL_WORDS];

/// Event priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[default]
    Low,
    High,
}

impl Priority {
    pub fn bits(self) -> u32 {
        match self {
            Priority::Low => 0,
            Priority::High => 1,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        if bits & PRIORITY_MASK == 1 {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

/// Whether the event came fresh from GrandCentral or has already circulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Age {
    #[default]
    New,
    Used,
}

/// Integrity of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataStatus {
    #[default]
    Ok,
    Corrupt,
    PossiblyCorrupt,
}

impl DataStatus {
    pub fn bits(self) -> u32 {
        match self {
            DataStatus::Ok => 0,
            DataStatus::Corrupt => 1,
            DataStatus::PossiblyCorrupt => 2,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => DataStatus::Corrupt,
            2 => DataStatus::PossiblyCorrupt,
            _ => DataStatus::Ok,
        }
    }
}

/// Pack priority and data status into one wire word.
pub fn pack_status(priority: Priority, status: DataStatus) -> u32 {
    priority.bits() | (status.bits() << DATA_SHIFT)
}

/// Inverse of [`pack_status`].
pub fn unpack_status(word: u32) -> (Priority, DataStatus) {
    (
        Priority::from_bits(word & PRIORITY_MASK),
        DataStatus::from_bits((word & DATA_MASK) >> DATA_SHIFT),
    )
}

/// Who currently holds an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Owner {
    #[default]
    System,
    Attachment(AttachmentId),
}

/// Mutable state of one pool cell.
#[derive(Debug)]
pub(crate) struct EventSlot {
    pub(crate) data: Vec<u8>,
    /// Pool buffer parked while a temp buffer is in use.
    pub(crate) parked: Option<Vec<u8>>,
    pub(crate) length: usize,
    pub(crate) priority: Priority,
    pub(crate) owner: Owner,
    pub(crate) group: u32,
    pub(crate) age: Age,
    pub(crate) data_status: DataStatus,
    pub(crate) byte_order: u32,
    pub(crate) control: ControlWords,
}

impl EventSlot {
    fn new(capacity: usize, group: u32) -> Self {
        Self {
            data: vec![0; capacity],
            parked: None,
            length: 0,
            priority: Priority::Low,
            owner: Owner::System,
            group,
            age: Age::New,
            data_status: DataStatus::Ok,
            byte_order: BYTE_ORDER_NATIVE,
            control: [0; CONTROL_WORDS],
        }
    }

    /// Reset metadata for an event handed out as new.
    pub(crate) fn init(&mut self) {
        self.age = Age::New;
        self.priority = Priority::Low;
        self.owner = Owner::System;
        self.length = 0;
        self.byte_order = BYTE_ORDER_NATIVE;
        self.data_status = DataStatus::Ok;
        self.control = [0; CONTROL_WORDS];
    }

    pub(crate) fn is_temp(&self) -> bool {
        self.parked.is_some()
    }
}

/// One entry of the event pool.
#[derive(Debug)]
pub(crate) struct EventCell {
    pub(crate) id: u32,
    pub(crate) slot: Mutex<EventSlot>,
}

impl EventCell {
    pub(crate) fn new(id: u32, capacity: usize, group: u32) -> Self {
        Self {
            id,
            slot: Mutex::new(EventSlot::new(capacity, group)),
        }
    }
}

/// Snapshot of the fields a selection predicate may look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventView {
    pub id: u32,
    pub length: usize,
    pub priority: Priority,
    pub group: u32,
    pub byte_order: u32,
    pub control: ControlWords,
}

/// Move-only handle to a pooled event.
pub struct Event {
    cell: Arc<EventCell>,
}

impl Event {
    pub(crate) fn from_cell(cell: Arc<EventCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn slot(&self) -> MutexGuard<'_, EventSlot> {
        self.cell.slot.lock()
    }

    /// Pool index of this event (the `place` on the wire).
    pub fn id(&self) -> u32 {
        self.cell.id
    }

    pub fn length(&self) -> usize {
        self.slot().length
    }

    /// Set the number of valid bytes.
    pub fn set_length(&mut self, length: usize) -> Result<()> {
        let mut slot = self.slot();
        if length > slot.data.len() {
            return Err(Error::BadArgument(format!(
                "length {} exceeds event capacity {}",
                length,
                slot.data.len()
            )));
        }
        slot.length = length;
        Ok(())
    }

    /// Size of the buffer currently behind this event.
    pub fn capacity(&self) -> usize {
        self.slot().data.len()
    }

    pub fn priority(&self) -> Priority {
        self.slot().priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.slot().priority = priority;
    }

    pub fn control(&self) -> ControlWords {
        self.slot().control
    }

    pub fn set_control(&mut self, control: ControlWords) {
        self.slot().control = control;
    }

    pub fn byte_order(&self) -> u32 {
        self.slot().byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: u32) {
        self.slot().byte_order = byte_order;
    }

    /// Whether the payload is in a foreign byte order.
    pub fn needs_swap(&self) -> bool {
        self.byte_order() != BYTE_ORDER_NATIVE
    }

    pub fn data_status(&self) -> DataStatus {
        self.slot().data_status
    }

    pub fn set_data_status(&mut self, status: DataStatus) {
        self.slot().data_status = status;
    }

    pub fn age(&self) -> Age {
        self.slot().age
    }

    pub fn owner(&self) -> Owner {
        self.slot().owner
    }

    pub fn group(&self) -> u32 {
        self.slot().group
    }

    /// Whether this event currently carries an oversized temp buffer.
    pub fn is_temp(&self) -> bool {
        self.slot().is_temp()
    }

    /// Valid payload bytes.
    pub fn data(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.slot(), |s| {
            let len = s.length;
            &mut s.data[..len]
        })
    }

    /// The whole buffer, for producers filling it in place.
    pub fn buffer_mut(&mut self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.slot(), |s| s.data.as_mut_slice())
    }

    /// Copy `bytes` into the buffer and set the length.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut slot = self.slot();
        if bytes.len() > slot.data.len() {
            return Err(Error::BadArgument(format!(
                "{} bytes do not fit in event of capacity {}",
                bytes.len(),
                slot.data.len()
            )));
        }
        slot.data[..bytes.len()].copy_from_slice(bytes);
        slot.length = bytes.len();
        Ok(())
    }

    /// Copy of the valid payload.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// Snapshot of the selectable fields.
    pub fn view(&self) -> EventView {
        let slot = self.slot();
        EventView {
            id: self.cell.id,
            length: slot.length,
            priority: slot.priority,
            group: slot.group,
            byte_order: slot.byte_order,
            control: slot.control,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot();
        f.debug_struct("Event")
            .field("id", &self.cell.id)
            .field("length", &slot.length)
            .field("priority", &slot.priority)
            .field("owner", &slot.owner)
            .field("age", &slot.age)
            .finish()
    }
}

/// Byte swap of 32-bit words, the default swap used by bridges.
///
/// Use [`swap32_in_place`] when source and destination are the same buffer.
/// Trailing bytes that do not form a whole word are copied unchanged.
pub fn swap32(src: &[u8], dst: &mut [u8]) {
    let len = src.len().min(dst.len());
    let words = len / 4 * 4;
    for (s, d) in src[..words].chunks_exact(4).zip(dst[..words].chunks_exact_mut(4)) {
        d.copy_from_slice(&[s[3], s[2], s[1], s[0]]);
    }
    dst[words..len].copy_from_slice(&src[words..len]);
}

/// In-place variant of [`swap32`].
pub fn swap32_in_place(buf: &mut [u8]) {
    for w in buf.chunks_exact_mut(4) {
        w.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(capacity: usize) -> Event {
        Event::from_cell(Arc::new(EventCell::new(3, capacity, 1)))
    }

    #[test]
    fn test_write_and_read_back() {
        let mut ev = event(16);
        ev.write(b"hello").unwrap();
        assert_eq!(ev.length(), 5);
        assert_eq!(&*ev.data(), b"hello");
        assert_eq!(ev.id(), 3);
    }

    #[test]
    fn test_length_bounded_by_capacity() {
        let mut ev = event(4);
        assert!(matches!(ev.set_length(5), Err(Error::BadArgument(_))));
        assert!(matches!(ev.write(b"12345"), Err(Error::BadArgument(_))));
        assert_eq!(ev.length(), 0);
    }

    #[test]
    fn test_fill_in_place() {
        let mut ev = event(8);
        ev.buffer_mut()[..3].copy_from_slice(&[1, 2, 3]);
        ev.set_length(3).unwrap();
        assert_eq!(ev.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_status_packing() {
        let word = pack_status(Priority::High, DataStatus::PossiblyCorrupt);
        assert_eq!(word, 0x21);
        assert_eq!(
            unpack_status(word),
            (Priority::High, DataStatus::PossiblyCorrupt)
        );
        assert_eq!(unpack_status(0), (Priority::Low, DataStatus::Ok));
    }

    #[test]
    fn test_swap32() {
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut dst = [0u8; 9];
        swap32(&src, &mut dst);
        assert_eq!(dst, [4, 3, 2, 1, 8, 7, 6, 5, 9]);

        let mut buf = src;
        swap32_in_place(&mut buf);
        assert_eq!(&buf[..8], &dst[..8]);
    }

    #[test]
    fn test_init_resets_metadata() {
        let mut ev = event(8);
        ev.set_priority(Priority::High);
        ev.set_control([1, 2, 3, 4, 5, 6]);
        ev.set_byte_order(BYTE_ORDER_SWAPPED);
        assert!(ev.needs_swap());
        ev.slot().init();
        assert_eq!(ev.priority(), Priority::Low);
        assert_eq!(ev.control(), [0; CONTROL_WORDS]);
        assert!(!ev.needs_swap());
        assert_eq!(ev.age(), Age::New);
    }
}
