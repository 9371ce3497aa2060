// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client handle for a system served over TCP.
//!
//! Requests are serialized on one connection. A blocking get is sent as a
//! series of short timed gets so that [`RemoteSystem::wakeup_attachment`]
//! is honored without a second connection.

use crate::attachment::AttachmentId;
use crate::error::{Error, Refused, Result};
use crate::event::{ControlWords, DataStatus, Priority, WaitMode, BYTE_ORDER_NATIVE};
use crate::station::{ParallelPosition, Position, StationConfig, StationId};
use crate::transport::Transport;
use crate::wire::{encode_station, Frame, GetHeader, Greeting, Opcode, PutHeader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::IoSlice;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single wait sent to the server.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// An event held by a remote client.
///
/// The payload lives client side; `put_events` sends it back by place.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    place: u32,
    capacity: usize,
    length: usize,
    priority: Priority,
    data_status: DataStatus,
    byte_order: u32,
    control: ControlWords,
    data: Vec<u8>,
}

impl RemoteEvent {
    fn fresh(place: u32, capacity: usize) -> Self {
        Self {
            place,
            capacity,
            length: 0,
            priority: Priority::Low,
            data_status: DataStatus::Ok,
            byte_order: BYTE_ORDER_NATIVE,
            control: [0; crate::event::CONTROL_WORDS],
            data: Vec::new(),
        }
    }

    fn received(header: GetHeader, data: Vec<u8>) -> Self {
        Self {
            place: header.place,
            capacity: header.capacity as usize,
            length: data.len(),
            priority: header.priority,
            data_status: header.data_status,
            byte_order: header.byte_order,
            control: header.control,
            data,
        }
    }

    /// Slot id in the remote pool.
    pub fn id(&self) -> u32 {
        self.place
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) -> Result<()> {
        if length > self.capacity {
            return Err(Error::BadArgument(format!(
                "length {} exceeds event capacity {}",
                length, self.capacity
            )));
        }
        if self.data.len() < length {
            self.data.resize(length, 0);
        }
        self.length = length;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn control(&self) -> ControlWords {
        self.control
    }

    pub fn set_control(&mut self, control: ControlWords) {
        self.control = control;
    }

    pub fn byte_order(&self) -> u32 {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: u32) {
        self.byte_order = byte_order;
    }

    pub fn needs_swap(&self) -> bool {
        self.byte_order != BYTE_ORDER_NATIVE
    }

    pub fn data_status(&self) -> DataStatus {
        self.data_status
    }

    pub fn set_data_status(&mut self, status: DataStatus) {
        self.data_status = status;
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The whole buffer, for filling in place before `set_length`.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.data.resize(self.capacity, 0);
        &mut self.data
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(Error::BadArgument(format!(
                "{} bytes do not fit in event of capacity {}",
                bytes.len(),
                self.capacity
            )));
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.length = bytes.len();
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    fn put_header(&self) -> Frame {
        let header = PutHeader {
            place: self.place,
            length: self.length as u64,
            priority: self.priority,
            data_status: self.data_status,
            byte_order: self.byte_order,
            control: self.control,
        };
        let mut frame = Frame::new();
        header.encode_into(&mut frame);
        frame
    }
}

#[derive(Default)]
struct ClientState {
    stations: HashMap<AttachmentId, StationId>,
    /// Attachments inside a blocking call, with their wakeup flag.
    waiting: HashMap<AttachmentId, bool>,
}

/// Connection to a remote ET system.
pub struct RemoteSystem {
    conn: Mutex<TcpStream>,
    peer: SocketAddr,
    host: String,
    event_size: usize,
    nevents: usize,
    state: Mutex<ClientState>,
    dead: AtomicBool,
    closed: AtomicBool,
}

impl RemoteSystem {
    /// Connect and exchange greetings.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .map_err(|e| Error::Generic(format!("connect: {}", e)))?;
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().map_err(Error::Read)?;
        let host = stream
            .local_addr()
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let greeting = Greeting::decode(&stream.receive_vec(Greeting::BYTES)?)?;
        stream.send(Greeting::new(0, 0).encode().as_bytes())?;

        log::debug!(
            "[RemoteSystem::connect] {} serves {} events of {} bytes",
            peer,
            greeting.nevents,
            greeting.event_size
        );
        Ok(Self {
            conn: Mutex::new(stream),
            peer,
            host,
            event_size: greeting.event_size as usize,
            nevents: greeting.nevents as usize,
            state: Mutex::new(ClientState::default()),
            dead: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn event_size(&self) -> usize {
        self.event_size
    }

    pub fn nevents(&self) -> usize {
        self.nevents
    }

    pub fn create_station(&self, name: &str, config: StationConfig) -> Result<StationId> {
        self.create_station_at(name, config, Position::End, ParallelPosition::End)
    }

    pub fn create_station_at(
        &self,
        name: &str,
        config: StationConfig,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<StationId> {
        let mut frame = Frame::request(Opcode::CreateStation);
        frame.u32(name.len() as u32);
        encode_station(&mut frame, &config, position, parallel)?;
        frame.bytes(name.as_bytes());
        self.call(|t| {
            t.send(frame.as_bytes())?;
            value(t).map(StationId)
        })
    }

    pub fn remove_station(&self, id: StationId) -> Result<()> {
        self.simple(Opcode::RemoveStation, id.0)
    }

    pub fn attach(&self, id: StationId) -> Result<AttachmentId> {
        let mut frame = Frame::request(Opcode::Attach);
        frame
            .u32(id.0)
            .u32(self.host.len() as u32)
            .bytes(self.host.as_bytes());
        let att = self.call(|t| {
            t.send(frame.as_bytes())?;
            value(t).map(AttachmentId)
        })?;
        self.state.lock().stations.insert(att, id);
        Ok(att)
    }

    pub fn detach(&self, att: AttachmentId) -> Result<()> {
        self.simple(Opcode::Detach, att.0)?;
        let mut state = self.state.lock();
        state.stations.remove(&att);
        state.waiting.remove(&att);
        Ok(())
    }

    pub fn new_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
    ) -> Result<Vec<RemoteEvent>> {
        self.new_events_group(att, mode, size, count, 0)
    }

    /// Group 0 means any group.
    pub fn new_events_group(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
        group: u32,
    ) -> Result<Vec<RemoteEvent>> {
        self.blocking(att, mode, |slice| {
            let mut frame = Frame::request(Opcode::EvsNew);
            frame
                .u32(att.0)
                .u32(slice.code())
                .u32(millis(slice.timeout()))
                .u64(size as u64)
                .u32(count as u32)
                .u32(group);
            self.call(|t| {
                t.send(frame.as_bytes())?;
                Error::check(t.receive_i32()?)?;
                let n = t.receive_u32()? as usize;
                t.receive_words(3 * n, |w| {
                    (0..n)
                        .map(|_| -> Result<RemoteEvent> {
                            Ok(RemoteEvent::fresh(w.u32()?, w.u64()? as usize))
                        })
                        .collect()
                })
            })
        })
    }

    pub fn get_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        count: usize,
    ) -> Result<Vec<RemoteEvent>> {
        self.blocking(att, mode, |slice| {
            let mut frame = Frame::request(Opcode::EvsGet);
            frame
                .u32(att.0)
                .u32(slice.code())
                .u32(millis(slice.timeout()))
                .u32(count as u32);
            self.call(|t| {
                t.send(frame.as_bytes())?;
                Error::check(t.receive_i32()?)?;
                let _bytes = t.receive_u64()?;
                let n = t.receive_u32()? as usize;
                let mut events = Vec::with_capacity(n);
                for _ in 0..n {
                    let header = GetHeader::decode(&t.receive_vec(GetHeader::BYTES)?)?;
                    let length = usize::try_from(header.length)
                        .map_err(|_| Error::TooBig(header.length))?;
                    let data = t.receive_vec(length)?;
                    events.push(RemoteEvent::received(header, data));
                }
                Ok(events)
            })
        })
    }

    /// Send every header and payload in one gathered write.
    pub fn put_events(&self, att: AttachmentId, events: Vec<RemoteEvent>) -> Result<()> {
        self.send_put(att, &events)
    }

    /// Like [`put_events`](Self::put_events), but a refused put hands the
    /// events back so the caller can dump them.
    pub fn try_put_events(
        &self,
        att: AttachmentId,
        events: Vec<RemoteEvent>,
    ) -> std::result::Result<(), Refused<RemoteEvent>> {
        self.send_put(att, &events)
            .map_err(|error| Refused { error, events })
    }

    fn send_put(&self, att: AttachmentId, events: &[RemoteEvent]) -> Result<()> {
        let headers: Vec<Frame> = events.iter().map(RemoteEvent::put_header).collect();
        let bytes: usize = events.iter().map(|e| PutHeader::BYTES + e.length).sum();
        let mut head = Frame::request(Opcode::EvsPut);
        head.u32(att.0).u32(events.len() as u32).u64(bytes as u64);

        let mut bufs = Vec::with_capacity(1 + 2 * events.len());
        bufs.push(IoSlice::new(head.as_bytes()));
        for (header, event) in headers.iter().zip(events) {
            bufs.push(IoSlice::new(header.as_bytes()));
            bufs.push(IoSlice::new(event.data()));
        }
        self.call(|t| {
            t.send_vectored(&bufs)?;
            status(t)
        })
    }

    pub fn dump_events(&self, att: AttachmentId, events: Vec<RemoteEvent>) -> Result<()> {
        let mut frame = Frame::request(Opcode::EvsDump);
        frame.u32(att.0).u32(events.len() as u32);
        for event in &events {
            frame.u32(event.place);
        }
        self.call(|t| {
            t.send(frame.as_bytes())?;
            status(t)
        })
    }

    /// Wake `att` if one of this handle's threads is blocked on it.
    pub fn wakeup_attachment(&self, att: AttachmentId) -> Result<()> {
        self.check_usable()?;
        if let Some(woken) = self.state.lock().waiting.get_mut(&att) {
            *woken = true;
        }
        Ok(())
    }

    /// Wake every reader of a station, here and on the server.
    pub fn wakeup_all(&self, id: StationId) -> Result<()> {
        {
            let mut state = self.state.lock();
            let ClientState { stations, waiting } = &mut *state;
            for (att, woken) in waiting.iter_mut() {
                if stations.get(att) == Some(&id) {
                    *woken = true;
                }
            }
        }
        self.simple(Opcode::WakeAll, id.0)
    }

    /// One round trip to the server's heartbeat.
    pub fn is_alive(&self) -> bool {
        self.call(|t| {
            t.send(Frame::request(Opcode::Alive).as_bytes())?;
            value(t)
        })
        .map(|alive| alive != 0)
        .unwrap_or(false)
    }

    /// Tell the server goodbye. Its side detaches what this handle left.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self.call(|t| {
            t.send(Frame::request(Opcode::Close).as_bytes())?;
            status(t)
        });
        self.closed.store(true, Ordering::Release);
        log::debug!("[RemoteSystem::close] {} closed", self.peer);
        match result {
            Err(Error::Dead) => Ok(()),
            other => other,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else if self.dead.load(Ordering::Acquire) {
            Err(Error::Dead)
        } else {
            Ok(())
        }
    }

    /// Run one request/reply exchange. Transport failures kill the handle.
    fn call<R>(&self, exchange: impl FnOnce(&mut TcpStream) -> Result<R>) -> Result<R> {
        self.check_usable()?;
        let mut conn = self.conn.lock();
        match exchange(&mut conn) {
            Err(Error::Read(e)) | Err(Error::Write(e)) => {
                log::warn!("[RemoteSystem::call] {} lost: {}", self.peer, e);
                self.dead.store(true, Ordering::Release);
                Err(Error::Dead)
            }
            other => other,
        }
    }

    fn simple(&self, op: Opcode, arg: u32) -> Result<()> {
        let mut frame = Frame::request(op);
        frame.u32(arg);
        self.call(|t| {
            t.send(frame.as_bytes())?;
            status(t)
        })
    }

    /// Drive a waiting request in slices of at most [`WAIT_SLICE`].
    fn blocking<R>(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        mut request: impl FnMut(WaitMode) -> Result<R>,
    ) -> Result<R> {
        let deadline = match mode {
            WaitMode::Async => return request(WaitMode::Async),
            WaitMode::Timed(timeout) => Some(Instant::now() + timeout),
            WaitMode::Sleep => None,
        };

        self.state.lock().waiting.insert(att, false);
        let result = loop {
            if self.state.lock().waiting.get(&att) == Some(&true) {
                break Err(Error::Wakeup);
            }
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(WAIT_SLICE),
                None => WAIT_SLICE,
            };
            match request(WaitMode::Timed(slice)) {
                Err(Error::Timeout) if deadline.map_or(true, |d| Instant::now() < d) => continue,
                other => break other,
            }
        };
        self.state.lock().waiting.remove(&att);
        result
    }
}

impl Drop for RemoteSystem {
    fn drop(&mut self) {
        if !self.is_closed() && !self.dead.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                log::debug!("[RemoteSystem::drop] close failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for RemoteSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSystem")
            .field("peer", &self.peer)
            .field("nevents", &self.nevents)
            .field("event_size", &self.event_size)
            .finish()
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

fn status(t: &mut TcpStream) -> Result<()> {
    Error::check(t.receive_i32()?).map(drop)
}

fn value(t: &mut TcpStream) -> Result<u32> {
    let status = t.receive_i32()?;
    let value = t.receive_u32()?;
    Error::check(status)?;
    Ok(value)
}
