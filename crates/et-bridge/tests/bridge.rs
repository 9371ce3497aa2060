// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Moving events between systems with `bridge`.

use et::{
    AttachmentId, Error, Event, Refused, RemoteSystem, StationConfig, StationId, System,
    SystemConfig, WaitMode, BYTE_ORDER_NATIVE, BYTE_ORDER_SWAPPED,
};
use et_bridge::{bridge, BridgeConfig, BridgeError, Endpoint, SwapKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn system(nevents: usize, event_size: usize) -> Arc<System> {
    System::create(SystemConfig::default().with_events(nevents, event_size)).unwrap()
}

fn served(nevents: usize, event_size: usize) -> (Arc<System>, RemoteSystem) {
    let system = System::create(
        SystemConfig::default()
            .with_events(nevents, event_size)
            .with_server("127.0.0.1:0"),
    )
    .unwrap();
    let remote = RemoteSystem::connect(system.server_addr().unwrap()).unwrap();
    (system, remote)
}

fn wait_until(what: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !what() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(what(), "condition not reached in time");
}

fn payload(i: usize) -> Vec<u8> {
    format!("payload-{}", i).into_bytes()
}

/// Put `count` tagged events into GrandCentral of `sys`.
fn produce(sys: &System, count: usize) {
    let producer = sys.attach(StationId::GRAND_CENTRAL).unwrap();
    let mut events = sys.new_events(producer, WaitMode::Sleep, 0, count).unwrap();
    for (i, event) in events.iter_mut().enumerate() {
        event.set_control([i as i32, 0, 0, 0, 0, 0]);
        event.write(&payload(i)).unwrap();
    }
    sys.put_events(producer, events).unwrap();
    sys.detach(producer).unwrap();
}

fn collect(sys: &System, att: AttachmentId, count: usize) -> Vec<Event> {
    let mut got = Vec::new();
    while got.len() < count {
        got.extend(
            sys.get_events(att, WaitMode::Timed(Duration::from_secs(5)), count - got.len())
                .unwrap(),
        );
    }
    got
}

/// A source station with a bridge attachment, and a destination station
/// with a consumer plus a GrandCentral producer for the bridge.
struct Setup {
    source: Arc<System>,
    from_att: AttachmentId,
    dest: Arc<System>,
    consumer: AttachmentId,
    to_att: AttachmentId,
}

fn setup(source: Arc<System>, dest: Arc<System>) -> Setup {
    let out = source.create_station("out", StationConfig::new()).unwrap();
    let from_att = source.attach(out).unwrap();
    let sink = dest.create_station("in", StationConfig::new()).unwrap();
    let consumer = dest.attach(sink).unwrap();
    let to_att = dest.attach(StationId::GRAND_CENTRAL).unwrap();
    Setup {
        source,
        from_att,
        dest,
        consumer,
        to_att,
    }
}

fn patient() -> BridgeConfig {
    BridgeConfig::new().with_mode_from(WaitMode::Timed(Duration::from_secs(5)))
}

#[test]
fn test_local_bridge_conserves_events() {
    let s = setup(system(20, 64), system(20, 64));
    produce(&s.source, 10);

    let config = patient().with_chunks(3, 2);
    let transfer = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 10).unwrap();
    assert_eq!(transfer.transferred, 10);
    assert!(transfer.stopped.is_none());
    let expected_bytes: usize = (0..10).map(|i| payload(i).len()).sum();
    assert_eq!(transfer.bytes, expected_bytes as u64);

    // originals went on down the source chain
    wait_until(|| s.source.census().free == 20);

    let got = collect(&s.dest, s.consumer, 10);
    for (i, event) in got.iter().enumerate() {
        assert_eq!(event.control()[0], i as i32);
        assert_eq!(&*event.data(), payload(i).as_slice());
        assert_eq!(event.byte_order(), BYTE_ORDER_NATIVE);
    }
    assert_eq!(s.dest.census().checked_out, 10);
    s.dest.put_events(s.consumer, got).unwrap();
    wait_until(|| s.dest.census().free == 20);
}

#[test]
fn test_bridge_stops_at_total_and_on_timeout() {
    let s = setup(system(20, 32), system(20, 32));
    produce(&s.source, 10);

    let config = patient().with_chunks(3, 3);
    let first = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 4).unwrap();
    assert_eq!(first.transferred, 4);

    let config = config.with_mode_from(WaitMode::Timed(Duration::from_millis(200)));
    let second = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 10).unwrap();
    assert_eq!(second.transferred, 6);
    assert!(matches!(second.stopped, Some(Error::Timeout)));

    let got = collect(&s.dest, s.consumer, 10);
    let tags: Vec<i32> = got.iter().map(|e| e.control()[0]).collect();
    assert_eq!(tags, (0..10).collect::<Vec<i32>>());
    s.dest.put_events(s.consumer, got).unwrap();
    wait_until(|| s.source.census().free == 20 && s.dest.census().free == 20);
}

#[test]
fn test_oversized_payload_gets_temp_event() {
    let s = setup(system(10, 32), system(10, 64));
    let producer = s.source.attach(StationId::GRAND_CENTRAL).unwrap();
    let mut events = s.source.new_events(producer, WaitMode::Sleep, 100, 1).unwrap();
    events[0].write(&[7u8; 100]).unwrap();
    s.source.put_events(producer, events).unwrap();

    let transfer = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &patient(), 1).unwrap();
    assert_eq!(transfer.transferred, 1);

    let got = collect(&s.dest, s.consumer, 1);
    assert_eq!(&*got[0].data(), &[7u8; 100][..]);
    assert!(got[0].capacity() >= 100);
    s.dest.put_events(s.consumer, got).unwrap();
    wait_until(|| s.dest.census().free == 10 && s.dest.temps_in_use() == 0);
    wait_until(|| s.source.census().free == 10);
}

#[test]
fn test_swap_only_foreign_byte_order() {
    let s = setup(system(10, 32), system(10, 32));
    let producer = s.source.attach(StationId::GRAND_CENTRAL).unwrap();
    let mut events = s.source.new_events(producer, WaitMode::Sleep, 0, 2).unwrap();
    events[0].write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    events[0].set_byte_order(BYTE_ORDER_SWAPPED);
    events[1].write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    s.source.put_events(producer, events).unwrap();

    let mut config = patient();
    config.swap = Some(SwapKind::Words32);
    let transfer = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 2).unwrap();
    assert_eq!(transfer.transferred, 2);

    let got = collect(&s.dest, s.consumer, 2);
    assert_eq!(&*got[0].data(), &[4, 3, 2, 1, 8, 7, 6, 5]);
    assert_eq!(got[0].byte_order(), BYTE_ORDER_NATIVE);
    assert_eq!(&*got[1].data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(got[1].byte_order(), BYTE_ORDER_NATIVE);
    s.dest.put_events(s.consumer, got).unwrap();
}

#[test]
fn test_foreign_order_kept_without_swap() {
    let s = setup(system(10, 32), system(10, 32));
    let calls = Arc::new(AtomicUsize::new(0));
    let producer = s.source.attach(StationId::GRAND_CENTRAL).unwrap();
    let mut events = s.source.new_events(producer, WaitMode::Sleep, 0, 1).unwrap();
    events[0].write(&[1, 2, 3, 4]).unwrap();
    events[0].set_byte_order(BYTE_ORDER_SWAPPED);
    s.source.put_events(producer, events).unwrap();

    // a custom swap that only counts leaves the bytes alone
    let counter = Arc::clone(&calls);
    let config = patient().with_swap(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let got = collect(&s.dest, s.consumer, 1);
    assert_eq!(&*got[0].data(), &[1, 2, 3, 4]);
    assert_eq!(got[0].byte_order(), BYTE_ORDER_NATIVE);
    s.dest.put_events(s.consumer, got).unwrap();

    // without any swap the tag travels unchanged
    let mut events = s.source.new_events(producer, WaitMode::Sleep, 0, 1).unwrap();
    events[0].write(&[1, 2, 3, 4]).unwrap();
    events[0].set_byte_order(BYTE_ORDER_SWAPPED);
    s.source.put_events(producer, events).unwrap();
    bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &patient(), 1).unwrap();
    let got = collect(&s.dest, s.consumer, 1);
    assert_eq!(got[0].byte_order(), BYTE_ORDER_SWAPPED);
    assert_eq!(&*got[0].data(), &[1, 2, 3, 4]);
    s.dest.put_events(s.consumer, got).unwrap();
}

#[test]
fn test_zero_chunk_is_bad_argument() {
    let s = setup(system(4, 16), system(4, 16));
    let config = BridgeConfig::new().with_chunks(0, 1);
    assert!(matches!(
        bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 1),
        Err(BridgeError::Et(Error::BadArgument(_)))
    ));
}

#[test]
fn test_failed_destination_returns_source_events() {
    let s = setup(system(20, 32), system(20, 32));
    produce(&s.source, 5);
    s.dest.close();

    let result = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &patient(), 5);
    match result {
        Err(BridgeError::Interrupted {
            transferred,
            source,
        }) => {
            assert_eq!(transferred, 0);
            assert!(matches!(source, Error::Closed));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    wait_until(|| s.source.census().free == 20 && s.source.census().checked_out == 0);
}

#[test]
fn test_partial_batch_counts_copied_events() {
    let s = setup(system(20, 64), system(2, 64));
    produce(&s.source, 4);

    let config = patient().with_chunks(4, 2).with_mode_to(WaitMode::Async);
    let transfer = bridge(&*s.source, &*s.dest, s.from_att, s.to_att, &config, 4).unwrap();
    assert_eq!(transfer.transferred, 2);
    assert!(matches!(transfer.stopped, Some(Error::Empty)));
    let expected_bytes: usize = (0..2).map(|i| payload(i).len()).sum();
    assert_eq!(transfer.bytes, expected_bytes as u64);

    let got = collect(&s.dest, s.consumer, 2);
    let tags: Vec<i32> = got.iter().map(|e| e.control()[0]).collect();
    assert_eq!(tags, vec![0, 1]);
    s.dest.put_events(s.consumer, got).unwrap();
    wait_until(|| s.dest.census().free == 2);

    // all four originals went back to the source
    wait_until(|| s.source.census().free == 20 && s.source.census().checked_out == 0);
}

/// A destination whose puts are always refused.
struct Refusing<'a>(&'a System);

impl Endpoint for Refusing<'_> {
    type Event = Event;

    fn event_size(&self) -> usize {
        self.0.event_size()
    }

    fn get_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        count: usize,
    ) -> et::Result<Vec<Event>> {
        self.0.get_events(att, mode, count)
    }

    fn new_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
    ) -> et::Result<Vec<Event>> {
        self.0.new_events(att, mode, size, count)
    }

    fn put_events(&self, _att: AttachmentId, events: Vec<Event>) -> Result<(), Refused<Event>> {
        Err(Refused {
            error: Error::Generic("put refused".into()),
            events,
        })
    }

    fn dump_events(&self, att: AttachmentId, events: Vec<Event>) -> et::Result<()> {
        self.0.dump_events(att, events)
    }
}

#[test]
fn test_refused_put_dumps_copies() {
    let s = setup(system(20, 32), system(20, 32));
    produce(&s.source, 3);

    let to = Refusing(&s.dest);
    let result = bridge(&*s.source, &to, s.from_att, s.to_att, &patient(), 3);
    match result {
        Err(BridgeError::Interrupted {
            transferred,
            source,
        }) => {
            assert_eq!(transferred, 0);
            assert!(matches!(source, Error::Generic(_)));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let census = s.dest.census();
    assert_eq!(census.checked_out, 0);
    assert_eq!(census.free, census.total);
    wait_until(|| s.source.census().free == 20 && s.source.census().checked_out == 0);
}

#[test]
fn test_remote_source_to_local_destination() {
    let (source, remote) = served(16, 64);
    let dest = system(16, 64);
    let out = remote.create_station("out", StationConfig::new()).unwrap();
    let from_att = remote.attach(out).unwrap();
    let sink = dest.create_station("in", StationConfig::new()).unwrap();
    let consumer = dest.attach(sink).unwrap();
    let to_att = dest.attach(StationId::GRAND_CENTRAL).unwrap();
    produce(&source, 6);

    let config = patient().with_chunks(4, 3);
    let transfer = bridge(&remote, &*dest, from_att, to_att, &config, 6).unwrap();
    assert_eq!(transfer.transferred, 6);

    let got = collect(&dest, consumer, 6);
    for (i, event) in got.iter().enumerate() {
        assert_eq!(&*event.data(), payload(i).as_slice());
    }
    dest.put_events(consumer, got).unwrap();
    wait_until(|| source.census().free == 16);
}

#[test]
fn test_local_source_to_remote_destination() {
    let source = system(16, 64);
    let (dest, remote) = served(16, 64);
    let out = source.create_station("out", StationConfig::new()).unwrap();
    let from_att = source.attach(out).unwrap();
    let sink = dest.create_station("in", StationConfig::new()).unwrap();
    let consumer = dest.attach(sink).unwrap();
    let to_att = remote.attach(StationId::GRAND_CENTRAL).unwrap();
    produce(&source, 6);

    let config = patient().with_chunks(2, 5);
    let transfer = bridge(&*source, &remote, from_att, to_att, &config, 6).unwrap();
    assert_eq!(transfer.transferred, 6);

    let got = collect(&dest, consumer, 6);
    for (i, event) in got.iter().enumerate() {
        assert_eq!(event.control()[0], i as i32);
        assert_eq!(&*event.data(), payload(i).as_slice());
    }
    dest.put_events(consumer, got).unwrap();
    wait_until(|| source.census().free == 16 && dest.census().free == 16);
}

#[test]
fn test_remote_to_remote() {
    let (source, from) = served(12, 48);
    let (dest, to) = served(12, 48);
    let out = from.create_station("out", StationConfig::new()).unwrap();
    let from_att = from.attach(out).unwrap();
    let sink = dest.create_station("in", StationConfig::new()).unwrap();
    let consumer = dest.attach(sink).unwrap();
    let to_att = to.attach(StationId::GRAND_CENTRAL).unwrap();
    produce(&source, 8);

    let transfer = bridge(&from, &to, from_att, to_att, &patient().with_chunks(5, 2), 8).unwrap();
    assert_eq!(transfer.transferred, 8);

    let got = collect(&dest, consumer, 8);
    assert_eq!(got.len(), 8);
    dest.put_events(consumer, got).unwrap();
    wait_until(|| source.census().free == 12 && dest.census().free == 12);
}
