// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket protocol codec.
//!
//! Every integer is a big-endian 32-bit word, except the byte-order tag of an
//! event, which travels in the sender's native order so the receiver can tell
//! whether the payload needs swapping. 64-bit quantities are split hi/lo.
//!
//! ```text
//!   greeting      MAGIC K size_hi size_lo nevents
//!   get header    len_hi len_lo mem_hi mem_lo status place 0 byteorder 0 control[K]
//!   put header    place 0 len_hi len_lo status byteorder 0 control[K]
//! ```

use crate::error::{Error, Result};
use crate::event::{pack_status, unpack_status, ControlWords, DataStatus, Priority, CONTROL_WORDS};
use crate::station::topology::{ParallelPosition, Position};
use crate::station::{BlockMode, FlowMode, RestoreMode, SelectionPolicy, StationConfig};

/// First word of every greeting.
pub const MAGIC: u32 = 0xC0DA_2002;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    EvsGet = 21,
    EvsPut = 23,
    EvsNew = 25,
    EvsDump = 27,
    Attach = 60,
    Detach = 61,
    CreateStation = 62,
    RemoveStation = 63,
    WakeAttachment = 70,
    WakeAll = 71,
    Alive = 80,
    Close = 90,
}

impl Opcode {
    pub fn from_u32(word: u32) -> Option<Self> {
        Some(match word {
            21 => Opcode::EvsGet,
            23 => Opcode::EvsPut,
            25 => Opcode::EvsNew,
            27 => Opcode::EvsDump,
            60 => Opcode::Attach,
            61 => Opcode::Detach,
            62 => Opcode::CreateStation,
            63 => Opcode::RemoveStation,
            70 => Opcode::WakeAttachment,
            71 => Opcode::WakeAll,
            80 => Opcode::Alive,
            90 => Opcode::Close,
            _ => return None,
        })
    }
}

pub fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

pub fn join_u64(hi: u32, lo: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Outgoing frame builder.
#[derive(Debug, Default, Clone)]
pub struct Frame {
    buf: Vec<u8>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame starting with a request opcode.
    pub fn request(op: Opcode) -> Self {
        let mut frame = Self::new();
        frame.u32(op as u32);
        frame
    }

    pub fn u32(&mut self, word: u32) -> &mut Self {
        self.buf.extend_from_slice(&word.to_be_bytes());
        self
    }

    pub fn i32(&mut self, word: i32) -> &mut Self {
        self.buf.extend_from_slice(&word.to_be_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        let (hi, lo) = split_u64(value);
        self.u32(hi).u32(lo)
    }

    /// A word written in native order.
    pub fn raw(&mut self, word: u32) -> &mut Self {
        self.buf.extend_from_slice(&word.to_ne_bytes());
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Cursor over a received block of words.
#[derive(Debug)]
pub struct Words<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Words<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| {
            Error::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated frame",
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn word(&mut self) -> Result<[u8; 4]> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(word)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.word()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.word()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let hi = self.u32()?;
        let lo = self.u32()?;
        Ok(join_u64(hi, lo))
    }

    pub fn raw(&mut self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.word()?))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    fn control(&mut self) -> Result<ControlWords> {
        let mut control = [0; CONTROL_WORDS];
        for word in control.iter_mut() {
            *word = self.i32()?;
        }
        Ok(control)
    }
}

/// Connection greeting, sent by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    pub control_words: u32,
    pub event_size: u64,
    pub nevents: u32,
}

impl Greeting {
    pub const BYTES: usize = 5 * 4;

    pub fn new(event_size: u64, nevents: u32) -> Self {
        Self {
            control_words: CONTROL_WORDS as u32,
            event_size,
            nevents,
        }
    }

    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        frame
            .u32(MAGIC)
            .u32(self.control_words)
            .u64(self.event_size)
            .u32(self.nevents);
        frame
    }

    /// Decode and check the magic and control-word count.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut words = Words::new(buf);
        let magic = words.u32()?;
        if magic != MAGIC {
            return Err(Error::BadArgument(format!("bad magic {:#x}", magic)));
        }
        let greeting = Self {
            control_words: words.u32()?,
            event_size: words.u64()?,
            nevents: words.u32()?,
        };
        if greeting.control_words as usize != CONTROL_WORDS {
            return Err(Error::BadArgument(format!(
                "peer uses {} control words, expected {}",
                greeting.control_words, CONTROL_WORDS
            )));
        }
        Ok(greeting)
    }
}

/// Per-event header of a get reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeader {
    pub length: u64,
    pub capacity: u64,
    pub priority: Priority,
    pub data_status: DataStatus,
    pub place: u32,
    pub byte_order: u32,
    pub control: ControlWords,
}

impl GetHeader {
    pub const WORDS: usize = 9 + CONTROL_WORDS;
    pub const BYTES: usize = Self::WORDS * 4;

    pub fn encode_into(&self, frame: &mut Frame) {
        frame
            .u64(self.length)
            .u64(self.capacity)
            .u32(pack_status(self.priority, self.data_status))
            .u32(self.place)
            .u32(0)
            .raw(self.byte_order)
            .u32(0);
        for &word in &self.control {
            frame.i32(word);
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut words = Words::new(buf);
        let length = words.u64()?;
        let capacity = words.u64()?;
        let (priority, data_status) = unpack_status(words.u32()?);
        let place = words.u32()?;
        words.u32()?;
        let byte_order = words.raw()?;
        words.u32()?;
        let control = words.control()?;
        Ok(Self {
            length,
            capacity,
            priority,
            data_status,
            place,
            byte_order,
            control,
        })
    }
}

/// Per-event header of a put request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutHeader {
    pub place: u32,
    pub length: u64,
    pub priority: Priority,
    pub data_status: DataStatus,
    pub byte_order: u32,
    pub control: ControlWords,
}

impl PutHeader {
    pub const WORDS: usize = 7 + CONTROL_WORDS;
    pub const BYTES: usize = Self::WORDS * 4;

    pub fn encode_into(&self, frame: &mut Frame) {
        frame
            .u32(self.place)
            .u32(0)
            .u64(self.length)
            .u32(pack_status(self.priority, self.data_status))
            .raw(self.byte_order)
            .u32(0);
        for &word in &self.control {
            frame.i32(word);
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut words = Words::new(buf);
        let place = words.u32()?;
        words.u32()?;
        let length = words.u64()?;
        let (priority, data_status) = unpack_status(words.u32()?);
        let byte_order = words.raw()?;
        words.u32()?;
        let control = words.control()?;
        Ok(Self {
            place,
            length,
            priority,
            data_status,
            byte_order,
            control,
        })
    }
}

/// Words of a station definition in a create request, name excluded.
pub const STATION_WORDS: usize = 9 + CONTROL_WORDS;

/// Encode a station definition. USER predicates cannot cross the wire.
pub fn encode_station(
    frame: &mut Frame,
    config: &StationConfig,
    position: Position,
    parallel: ParallelPosition,
) -> Result<()> {
    if matches!(config.select, SelectionPolicy::User(_)) {
        return Err(Error::BadArgument(
            "user selection cannot be used remotely".into(),
        ));
    }
    let flow = match config.flow {
        FlowMode::Serial => 0,
        FlowMode::Parallel => 1,
    };
    let restore = match config.restore {
        RestoreMode::Out => 0,
        RestoreMode::In => 1,
        RestoreMode::GrandCentral => 2,
        RestoreMode::Redistribute => 3,
    };
    let block = match config.block {
        BlockMode::Blocking => 0,
        BlockMode::NonBlocking => 1,
    };
    frame
        .u32(flow)
        .u32(config.user_mode as u32)
        .u32(restore)
        .u32(block)
        .u32(config.select.code())
        .u32(config.prescale)
        .u32(config.cue as u32)
        .i32(position.code())
        .i32(parallel.code());
    let select = config
        .select
        .select_words()
        .copied()
        .unwrap_or(crate::station::SELECT_NONE);
    for word in select {
        frame.i32(word);
    }
    Ok(())
}

/// Inverse of [`encode_station`].
pub fn decode_station(buf: &[u8]) -> Result<(StationConfig, Position, ParallelPosition)> {
    let mut words = Words::new(buf);
    let flow = match words.u32()? {
        0 => FlowMode::Serial,
        1 => FlowMode::Parallel,
        other => return Err(Error::BadArgument(format!("flow mode {}", other))),
    };
    let user_mode = words.u32()? as usize;
    let restore = match words.u32()? {
        0 => RestoreMode::Out,
        1 => RestoreMode::In,
        2 => RestoreMode::GrandCentral,
        3 => RestoreMode::Redistribute,
        other => return Err(Error::BadArgument(format!("restore mode {}", other))),
    };
    let block = match words.u32()? {
        0 => BlockMode::Blocking,
        1 => BlockMode::NonBlocking,
        other => return Err(Error::BadArgument(format!("block mode {}", other))),
    };
    let select_code = words.u32()?;
    let prescale = words.u32()?;
    let cue = words.u32()? as usize;
    let position = Position::from_code(words.i32()?)?;
    let parallel = ParallelPosition::from_code(words.i32()?)?;
    let select_words = words.control()?;
    let select = match select_code {
        1 => SelectionPolicy::All,
        2 => SelectionPolicy::Match(select_words),
        4 => SelectionPolicy::RoundRobin,
        5 => SelectionPolicy::EqualCue,
        other => return Err(Error::BadArgument(format!("select mode {}", other))),
    };
    let config = StationConfig {
        flow,
        user_mode,
        block,
        select,
        restore,
        prescale,
        cue,
    };
    Ok((config, position, parallel))
}
