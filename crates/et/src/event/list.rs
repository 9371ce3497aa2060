// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Station event queue.
//!
//! # Ordering
//!
//! ```text
//!   front                                   back
//!   [ H H H | L L L L L ]
//!           ^ high (number of leading HIGH events)
//! ```
//!
//! HIGH events are inserted at the end of the leading HIGH block, LOW events
//! at the tail. Readers always take from the front, so no LOW event is ever
//! delivered ahead of a HIGH event that was queued with it.
//!
//! # Waiting
//!
//! Readers block on a parking_lot condvar. A reader leaves the wait when data
//! arrives, when its deadline passes ([`Error::Timeout`]), or when it is woken
//! explicitly ([`Error::Wakeup`]), either individually through its
//! [`Waiter`] or together through [`EventList::wakeup_all`].

use super::{Event, Priority};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How a get behaves when the list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Block until events arrive or the reader is woken.
    Sleep,
    /// Block at most this long, then fail with [`Error::Timeout`].
    Timed(Duration),
    /// Never block; fail with [`Error::Empty`].
    Async,
}

impl WaitMode {
    /// Wire code of the mode.
    pub fn code(self) -> u32 {
        match self {
            WaitMode::Sleep => 0,
            WaitMode::Timed(_) => 1,
            WaitMode::Async => 2,
        }
    }

    /// Rebuild a mode from its wire code and timeout.
    pub fn from_code(code: u32, timeout: Duration) -> Result<Self> {
        match code {
            0 => Ok(WaitMode::Sleep),
            1 => Ok(WaitMode::Timed(timeout)),
            2 => Ok(WaitMode::Async),
            other => Err(Error::BadArgument(format!("wait mode {}", other))),
        }
    }

    pub fn timeout(self) -> Duration {
        match self {
            WaitMode::Timed(d) => d,
            _ => Duration::ZERO,
        }
    }
}

/// Per-reader wait state, owned by an attachment.
#[derive(Debug, Default)]
pub(crate) struct Waiter {
    waiting: AtomicBool,
    wakeup: AtomicBool,
    quit: AtomicBool,
}

impl Waiter {
    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Refuse every later get, parked or not.
    pub(crate) fn quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    fn has_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

/// Counter snapshot of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListCounters {
    /// Events currently queued.
    pub count: usize,
    /// Events offered by conductors (prescale bookkeeping).
    pub tried: u64,
    /// Events accepted.
    pub ins: u64,
    /// Events taken out.
    pub outs: u64,
}

#[derive(Default)]
struct Inner {
    events: VecDeque<Event>,
    high: usize,
    tried: u64,
    ins: u64,
    outs: u64,
    waiting: usize,
    wake_all: bool,
    interrupted: bool,
}

impl Inner {
    fn push(&mut self, event: Event) {
        if event.priority() == Priority::High {
            self.events.insert(self.high, event);
            self.high += 1;
        } else {
            self.events.push_back(event);
        }
    }

    fn leading_high(&self) -> usize {
        self.events
            .iter()
            .take_while(|e| e.priority() == Priority::High)
            .count()
    }

    fn take_front(&mut self, n: usize) -> Vec<Event> {
        let n = n.min(self.events.len());
        self.high = self.high.saturating_sub(n);
        self.outs += n as u64;
        self.events.drain(..n).collect()
    }
}

/// One side (input or output) of a station.
pub struct EventList {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl Default for EventList {
    fn default() -> Self {
        Self::new()
    }
}

impl EventList {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            not_empty: Condvar::new(),
        }
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> ListCounters {
        let inner = self.inner.lock();
        ListCounters {
            count: inner.events.len(),
            tried: inner.tried,
            ins: inner.ins,
            outs: inner.outs,
        }
    }

    /// Ids of queued events, front first.
    pub fn ids(&self) -> Vec<u32> {
        self.inner.lock().events.iter().map(Event::id).collect()
    }

    /// Client put: HIGH after the existing HIGH block, LOW at the tail.
    pub(crate) fn put(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.events.is_empty() {
            inner.high = 0;
        }
        inner.ins += events.len() as u64;
        for event in events {
            inner.push(event);
        }
        self.not_empty.notify_all();
    }

    /// Put events back at the front, HIGH first then LOW ahead of queued LOWs.
    pub(crate) fn put_reverse(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.high = inner.leading_high();
        for event in events {
            if event.priority() == Priority::High {
                inner.events.push_front(event);
                inner.high += 1;
            } else {
                let at = inner.high;
                inner.events.insert(at, event);
            }
        }
        self.not_empty.notify_all();
    }

    /// Append regardless of priority. Used for GrandCentral.
    pub(crate) fn put_in_low(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.ins += events.len() as u64;
        inner.events.extend(events);
        self.not_empty.notify_all();
    }

    /// Lock the list for a conductor transfer.
    ///
    /// Readers are notified when the guard drops.
    pub(crate) fn transfer(&self) -> Transfer<'_> {
        Transfer {
            inner: self.inner.lock(),
            not_empty: &self.not_empty,
            touched: false,
        }
    }

    /// Get up to `quantity` events.
    pub(crate) fn get(&self, waiter: &Waiter, mode: WaitMode, quantity: usize) -> Result<Vec<Event>> {
        let mut inner = self.inner.lock();
        if waiter.has_quit() {
            return Err(Error::Wakeup);
        }
        let deadline = deadline_for(mode);
        while inner.events.is_empty() {
            if mode == WaitMode::Async {
                return Err(Error::Empty);
            }
            let timed_out = self.park(&mut inner, waiter, deadline)?;
            if timed_out && inner.events.is_empty() {
                return Err(Error::Timeout);
            }
        }
        Ok(inner.take_front(quantity))
    }

    /// Get up to `quantity` events belonging to producer `group`.
    ///
    /// Keeps waiting while the list holds only other groups' events.
    pub(crate) fn get_group(
        &self,
        waiter: &Waiter,
        mode: WaitMode,
        quantity: usize,
        group: u32,
    ) -> Result<Vec<Event>> {
        let mut inner = self.inner.lock();
        if waiter.has_quit() {
            return Err(Error::Wakeup);
        }
        let deadline = deadline_for(mode);
        let mut timed_out = false;
        loop {
            let matching = inner.events.iter().filter(|e| e.group() == group).count();
            if matching > 0 {
                let mut wanted = quantity.min(matching);
                let mut taken = Vec::with_capacity(wanted);
                let mut kept = VecDeque::with_capacity(inner.events.len() - wanted);
                for event in inner.events.drain(..) {
                    if wanted > 0 && event.group() == group {
                        taken.push(event);
                        wanted -= 1;
                    } else {
                        kept.push_back(event);
                    }
                }
                inner.events = kept;
                inner.high = inner.leading_high();
                inner.outs += taken.len() as u64;
                return Ok(taken);
            }
            if mode == WaitMode::Async {
                return Err(Error::Empty);
            }
            // one last look after the deadline
            if timed_out {
                return Err(Error::Timeout);
            }
            timed_out = self.park(&mut inner, waiter, deadline)?;
        }
    }

    /// Remove everything, for flushing a station.
    pub(crate) fn take_all(&self) -> Vec<Event> {
        let mut inner = self.inner.lock();
        let n = inner.events.len();
        inner.take_front(n)
    }

    /// Conductor wait: take everything once the list is non-empty.
    ///
    /// Returns `None` after [`interrupt`](Self::interrupt).
    pub(crate) fn take_all_blocking(&self) -> Option<Vec<Event>> {
        let mut inner = self.inner.lock();
        while inner.events.is_empty() && !inner.interrupted {
            self.not_empty.wait(&mut inner);
        }
        if inner.interrupted {
            inner.interrupted = false;
            return None;
        }
        let n = inner.events.len();
        Some(inner.take_front(n))
    }

    /// Release a conductor parked in [`take_all_blocking`](Self::take_all_blocking).
    pub(crate) fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupted = true;
        self.not_empty.notify_all();
    }

    /// Wake one reader if it is currently blocked on this list.
    pub(crate) fn wakeup(&self, waiter: &Waiter) {
        let _inner = self.inner.lock();
        if !waiter.is_waiting() {
            return;
        }
        waiter.wakeup.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    /// Wake every reader blocked on this list.
    pub fn wakeup_all(&self) {
        let mut inner = self.inner.lock();
        if inner.waiting < 1 {
            return;
        }
        inner.wake_all = true;
        self.not_empty.notify_all();
    }

    /// Block once. Returns whether the deadline passed.
    fn park(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        waiter: &Waiter,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        if waiter.has_quit() {
            return Err(Error::Wakeup);
        }
        inner.waiting += 1;
        waiter.waiting.store(true, Ordering::Release);

        let timed_out = match deadline {
            Some(deadline) => self.not_empty.wait_until(inner, deadline).timed_out(),
            None => {
                self.not_empty.wait(inner);
                false
            }
        };

        waiter.waiting.store(false, Ordering::Release);
        inner.waiting -= 1;
        let woken = waiter.wakeup.swap(false, Ordering::AcqRel) || inner.wake_all;
        if inner.waiting == 0 {
            inner.wake_all = false;
        }
        if woken {
            return Err(Error::Wakeup);
        }
        Ok(timed_out)
    }
}

fn deadline_for(mode: WaitMode) -> Option<Instant> {
    match mode {
        WaitMode::Timed(timeout) => Some(Instant::now() + timeout),
        _ => None,
    }
}

/// Exclusive access to a list while a conductor routes a batch into it.
pub(crate) struct Transfer<'a> {
    inner: MutexGuard<'a, Inner>,
    not_empty: &'a Condvar,
    touched: bool,
}

impl Transfer<'_> {
    pub(crate) fn len(&self) -> usize {
        self.inner.events.len()
    }

    pub(crate) fn tried(&self) -> u64 {
        self.inner.tried
    }

    pub(crate) fn add_tried(&mut self, n: u64) {
        self.inner.tried += n;
    }

    /// Queue a conductor batch, HIGH events after the existing HIGH block.
    pub(crate) fn put_all(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        if self.inner.events.is_empty() {
            self.inner.high = 0;
        }
        self.inner.ins += events.len() as u64;
        for event in events {
            self.inner.push(event);
        }
        self.touched = true;
    }

    /// Append a batch regardless of priority.
    pub(crate) fn put_in_low(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        self.inner.ins += events.len() as u64;
        self.inner.events.extend(events);
        self.touched = true;
    }
}

impl Drop for Transfer<'_> {
    fn drop(&mut self) {
        if self.touched {
            self.not_empty.notify_all();
        }
    }
}
