// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP server giving remote clients access to a [`System`].
//!
//! One thread accepts, one thread serves each connection. A connection
//! remembers the attachments it created and detaches whatever is left when
//! the peer disconnects, so a crashed client gives its events back.

use crate::attachment::AttachmentId;
use crate::error::{Error, Result, OK};
use crate::event::{Event, WaitMode};
use crate::station::StationId;
use crate::system::System;
use crate::transport::Transport;
use crate::wire::{
    decode_station, Frame, GetHeader, Greeting, Opcode, PutHeader, STATION_WORDS,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::IoSlice;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest station or host name accepted from a peer.
const MAX_NAME_LEN: usize = 4096;

/// Buffer used to skip rejected payloads.
const DISCARD_CHUNK: usize = 64 * 1024;

/// Poll interval of the nonblocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

type Streams = Arc<Mutex<HashMap<u64, TcpStream>>>;

pub(crate) struct Server {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    streams: Streams,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Bind `addr` and start accepting.
    pub(crate) fn start(system: Weak<System>, addr: &str) -> Result<Server> {
        let listener = create_tcp_listener(addr)?;
        let addr = listener.local_addr().map_err(Error::Read)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let streams: Streams = Arc::new(Mutex::new(HashMap::new()));

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let streams = Arc::clone(&streams);
            thread::Builder::new()
                .name("et-server".into())
                .spawn(move || accept_loop(listener, system, shutdown, streams))
                .map_err(|e| Error::Generic(format!("spawn server thread: {}", e)))?
        };

        log::info!("[Server::start] listening on {}", addr);
        Ok(Server {
            addr,
            shutdown,
            streams,
            accept_thread: Some(accept_thread),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and cut every open connection.
    pub(crate) fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                log::error!("[Server::stop] accept thread panicked");
            }
        }
        for stream in self.streams.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

fn create_tcp_listener(addr: &str) -> Result<TcpListener> {
    let addr = addr
        .to_socket_addrs()
        .map_err(|e| Error::BadArgument(format!("server address {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| Error::BadArgument(format!("server address {} resolves to nothing", addr)))?;

    let bind = || -> std::io::Result<TcpListener> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        Ok(listener)
    };
    bind().map_err(|e| Error::Generic(format!("bind {}: {}", addr, e)))
}

fn accept_loop(
    listener: TcpListener,
    system: Weak<System>,
    shutdown: Arc<AtomicBool>,
    streams: Streams,
) {
    let next_id = AtomicU64::new(0);
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let _ = stream.set_nonblocking(false);
                let _ = stream.set_nodelay(true);
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                match stream.try_clone() {
                    Ok(clone) => {
                        streams.lock().insert(id, clone);
                    }
                    Err(e) => {
                        log::warn!("[Server::accept] {}: cannot track stream: {}", peer, e);
                        continue;
                    }
                }
                let system = Weak::clone(&system);
                let streams = Arc::clone(&streams);
                let spawned = thread::Builder::new()
                    .name(format!("et-conn-{}", id))
                    .spawn(move || {
                        Connection::new(stream, peer.to_string()).serve(&system);
                        streams.lock().remove(&id);
                    });
                if let Err(e) = spawned {
                    log::error!("[Server::accept] {}: cannot spawn handler: {}", peer, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::debug!("[Server::accept] {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

enum Flow {
    Continue,
    Close,
}

/// Server side of one client connection.
struct Connection<T: Transport> {
    transport: T,
    peer: String,
    attachments: Vec<AttachmentId>,
}

impl<T: Transport> Connection<T> {
    fn new(transport: T, peer: String) -> Self {
        Self {
            transport,
            peer,
            attachments: Vec::new(),
        }
    }

    fn serve(mut self, system: &Weak<System>) {
        if let Err(e) = self.handshake(system) {
            log::warn!("[Server::serve] {}: handshake failed: {}", self.peer, e);
            return;
        }
        log::debug!("[Server::serve] {} connected", self.peer);

        loop {
            let word = match self.transport.receive_u32() {
                Ok(word) => word,
                Err(_) => break,
            };
            let Some(system) = system.upgrade() else {
                break;
            };
            let Some(op) = Opcode::from_u32(word) else {
                log::warn!("[Server::serve] {}: unknown opcode {}", self.peer, word);
                break;
            };
            match self.handle(&system, op) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    log::debug!("[Server::serve] {}: {:?} failed: {}", self.peer, op, e);
                    break;
                }
            }
        }

        self.release(system);
    }

    fn handshake(&mut self, system: &Weak<System>) -> Result<()> {
        let greeting = {
            let system = system.upgrade().ok_or(Error::Closed)?;
            Greeting::new(system.event_size() as u64, system.nevents() as u32)
        };
        self.transport.send(greeting.encode().as_bytes())?;
        let reply = self.transport.receive_vec(Greeting::BYTES)?;
        Greeting::decode(&reply)?;
        Ok(())
    }

    /// Detach whatever the peer left behind.
    fn release(self, system: &Weak<System>) {
        if self.attachments.is_empty() {
            log::debug!("[Server::serve] {} disconnected", self.peer);
            return;
        }
        let Some(system) = system.upgrade() else {
            return;
        };
        log::info!(
            "[Server::serve] {} disconnected holding {} attachments",
            self.peer,
            self.attachments.len()
        );
        for att in self.attachments {
            if let Err(e) = system.detach(att) {
                log::debug!("[Server::serve] detach {}: {}", att, e);
            }
        }
    }

    /// Run one request. Errors returned here are transport failures; an
    /// operation failure travels back to the peer as a status word.
    fn handle(&mut self, system: &System, op: Opcode) -> Result<Flow> {
        match op {
            Opcode::Attach => {
                let (station, host_len) =
                    self.transport.receive_words(2, |w| Ok((w.u32()?, w.u32()? as usize)))?;
                let host = self.receive_name(host_len)?;
                let result = system.attach_from(StationId(station), &host);
                if let Ok(att) = result {
                    self.attachments.push(att);
                }
                self.reply(result.map(|att| att.0))?;
            }
            Opcode::Detach => {
                let att = AttachmentId(self.transport.receive_u32()?);
                let result = self.owned(att).and_then(|att| system.detach(att));
                if result.is_ok() {
                    self.attachments.retain(|&a| a != att);
                }
                self.reply_status(result)?;
            }
            Opcode::CreateStation => {
                let name_len = self.transport.receive_u32()? as usize;
                let definition = self.transport.receive_vec(STATION_WORDS * 4)?;
                let name = self.receive_name(name_len)?;
                let result = decode_station(&definition).and_then(|(config, pos, ppos)| {
                    system.create_station_at(&name, config, pos, ppos)
                });
                self.reply(result.map(|id| id.0))?;
            }
            Opcode::RemoveStation => {
                let id = StationId(self.transport.receive_u32()?);
                self.reply_status(system.remove_station(id))?;
            }
            Opcode::EvsNew => self.new_events(system)?,
            Opcode::EvsGet => self.get_events(system)?,
            Opcode::EvsPut => self.put_events(system)?,
            Opcode::EvsDump => {
                let (att, count) =
                    self.transport.receive_words(2, |w| Ok((w.u32()?, w.u32()? as usize)))?;
                if count > system.nevents() {
                    return Err(Error::TooBig(count as u64));
                }
                let places = self.transport.receive_words(count, |w| {
                    (0..count).map(|_| w.u32()).collect::<Result<Vec<_>>>()
                })?;
                let att = AttachmentId(att);
                let result = self
                    .owned(att)
                    .and_then(|att| held(system, att, &places))
                    .and_then(|events| system.dump_events(att, events));
                self.reply_status(result)?;
            }
            Opcode::WakeAttachment => {
                let att = AttachmentId(self.transport.receive_u32()?);
                let result = self.owned(att).and_then(|att| system.wakeup_attachment(att));
                self.reply_status(result)?;
            }
            Opcode::WakeAll => {
                let id = StationId(self.transport.receive_u32()?);
                self.reply_status(system.wakeup_all(id))?;
            }
            Opcode::Alive => {
                self.reply(Ok(u32::from(system.is_alive())))?;
            }
            Opcode::Close => {
                self.reply_status(Ok(()))?;
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }

    fn new_events(&mut self, system: &System) -> Result<()> {
        let (att, mode, size, count, group) = self.transport.receive_words(7, |w| {
            let att = AttachmentId(w.u32()?);
            let code = w.u32()?;
            let timeout = Duration::from_millis(u64::from(w.u32()?));
            let mode = WaitMode::from_code(code, timeout);
            let size = w.u64()? as usize;
            let count = w.u32()? as usize;
            let group = w.u32()?;
            Ok((att, mode, size, count, group))
        })?;

        let result = self.owned(att).and_then(|att| {
            let mode = mode?;
            if group == 0 {
                system.new_events(att, mode, size, count)
            } else {
                system.new_events_group(att, mode, size, count, group)
            }
        });
        match result {
            Ok(events) => {
                let mut frame = Frame::new();
                frame.i32(OK).u32(events.len() as u32);
                for event in &events {
                    frame.u32(event.id()).u64(event.capacity() as u64);
                }
                self.transport.send(frame.as_bytes())
            }
            Err(e) => self.reply_status(Err(e)),
        }
    }

    fn get_events(&mut self, system: &System) -> Result<()> {
        let (att, mode, count) = self.transport.receive_words(4, |w| {
            let att = AttachmentId(w.u32()?);
            let code = w.u32()?;
            let timeout = Duration::from_millis(u64::from(w.u32()?));
            let count = w.u32()? as usize;
            Ok((att, WaitMode::from_code(code, timeout), count))
        })?;

        let result = self
            .owned(att)
            .and_then(|att| system.get_events(att, mode?, count));
        let events = match result {
            Ok(events) => events,
            Err(e) => return self.reply_status(Err(e)),
        };

        let headers: Vec<Frame> = events.iter().map(get_header).collect();
        let payloads: Vec<_> = events.iter().map(Event::data).collect();
        let bytes: usize = payloads.iter().map(|p| GetHeader::BYTES + p.len()).sum();

        let mut head = Frame::new();
        head.i32(OK).u64(bytes as u64).u32(events.len() as u32);
        let mut bufs = Vec::with_capacity(1 + 2 * events.len());
        bufs.push(IoSlice::new(head.as_bytes()));
        for (header, payload) in headers.iter().zip(&payloads) {
            bufs.push(IoSlice::new(header.as_bytes()));
            bufs.push(IoSlice::new(payload));
        }
        self.transport.send_vectored(&bufs)
    }

    fn put_events(&mut self, system: &System) -> Result<()> {
        let (att, count, _bytes) = self.transport.receive_words(4, |w| {
            Ok((AttachmentId(w.u32()?), w.u32()? as usize, w.u64()?))
        })?;
        if count > system.nevents() {
            return Err(Error::TooBig(count as u64));
        }
        let mut failure = self.owned(att).err();

        // drain the whole request before judging it
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            let header = PutHeader::decode(&self.transport.receive_vec(PutHeader::BYTES)?)?;
            let target = match failure {
                Some(_) => None,
                None => Some(system.held_event(att, header.place).and_then(|event| {
                    if header.length > event.capacity() as u64 {
                        Err(Error::TooBig(header.length))
                    } else {
                        Ok(event)
                    }
                })),
            };
            match target {
                Some(Ok(mut event)) => {
                    let payload = self.transport.receive_vec(header.length as usize)?;
                    event.write(&payload)?;
                    event.set_priority(header.priority);
                    event.set_data_status(header.data_status);
                    event.set_byte_order(header.byte_order);
                    event.set_control(header.control);
                    events.push(event);
                }
                Some(Err(e)) => {
                    self.discard(header.length)?;
                    failure = Some(e);
                }
                None => self.discard(header.length)?,
            }
        }

        let result = match failure {
            Some(e) => Err(e),
            None => system.put_events(att, events),
        };
        self.reply_status(result)
    }

    /// Read and drop `len` bytes of a rejected payload.
    fn discard(&mut self, len: u64) -> Result<()> {
        let mut chunk = vec![0u8; DISCARD_CHUNK];
        let mut left = len;
        while left > 0 {
            let n = left.min(DISCARD_CHUNK as u64) as usize;
            self.transport.receive(&mut chunk[..n])?;
            left -= n as u64;
        }
        Ok(())
    }

    fn receive_name(&mut self, len: usize) -> Result<String> {
        if len > MAX_NAME_LEN {
            return Err(Error::TooBig(len as u64));
        }
        let bytes = self.transport.receive_vec(len)?;
        String::from_utf8(bytes).map_err(|e| Error::BadArgument(format!("name: {}", e)))
    }

    fn owned(&self, att: AttachmentId) -> Result<AttachmentId> {
        if self.attachments.contains(&att) {
            Ok(att)
        } else {
            Err(Error::BadArgument(format!(
                "{} does not belong to this connection",
                att
            )))
        }
    }

    fn reply(&mut self, result: Result<u32>) -> Result<()> {
        let mut frame = Frame::new();
        match result {
            Ok(value) => frame.i32(OK).u32(value),
            Err(e) => frame.i32(e.code()).u32(0),
        };
        self.transport.send(frame.as_bytes())
    }

    fn reply_status(&mut self, result: Result<()>) -> Result<()> {
        let mut frame = Frame::new();
        frame.i32(match result {
            Ok(()) => OK,
            Err(e) => e.code(),
        });
        self.transport.send(frame.as_bytes())
    }
}

fn held(system: &System, att: AttachmentId, places: &[u32]) -> Result<Vec<Event>> {
    places
        .iter()
        .map(|&place| system.held_event(att, place))
        .collect()
}

fn get_header(event: &Event) -> Frame {
    let header = GetHeader {
        length: event.length() as u64,
        capacity: event.capacity() as u64,
        priority: event.priority(),
        data_status: event.data_status(),
        place: event.id(),
        byte_order: event.byte_order(),
        control: event.control(),
    };
    let mut frame = Frame::new();
    header.encode_into(&mut frame);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use std::io::Read;

    #[test]
    fn test_greeting_sent_on_connect() {
        let system = System::create(
            SystemConfig::default()
                .with_events(12, 48)
                .with_server("127.0.0.1:0"),
        )
        .unwrap();
        let addr = system.server_addr().unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();
        let mut buf = [0u8; Greeting::BYTES];
        stream.read_exact(&mut buf).unwrap();
        let greeting = Greeting::decode(&buf).unwrap();
        assert_eq!(greeting.event_size, 48);
        assert_eq!(greeting.nevents, 12);
        system.close();
    }

    #[test]
    fn test_wakeup_of_foreign_attachment_rejected() {
        let system = System::create(
            SystemConfig::default()
                .with_events(4, 16)
                .with_server("127.0.0.1:0"),
        )
        .unwrap();
        let local = system.attach(StationId::GRAND_CENTRAL).unwrap();

        let mut stream = TcpStream::connect(system.server_addr().unwrap()).unwrap();
        Greeting::decode(&stream.receive_vec(Greeting::BYTES).unwrap()).unwrap();
        stream.send(Greeting::new(0, 0).encode().as_bytes()).unwrap();

        let mut frame = Frame::request(Opcode::WakeAttachment);
        frame.u32(local.0);
        stream.send(frame.as_bytes()).unwrap();
        assert!(matches!(
            Error::check(stream.receive_i32().unwrap()),
            Err(Error::BadArgument(_))
        ));
        system.close();
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(matches!(
            create_tcp_listener("not an address"),
            Err(Error::BadArgument(_))
        ));
    }
}
