// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event transfer between two ET systems.
//!
//! [`bridge`] gets events from one system, copies each into a new event of
//! the other, puts the copies there and hands the originals back to the
//! source station. Either side may be a local [`System`] or a
//! [`RemoteSystem`]; the socket round trips of the remote side live in its
//! [`Endpoint`] implementation.

use crate::config::{BridgeConfig, ConfigError, SwapFn};
use et::{
    AttachmentId, ControlWords, Error, Event, Priority, Refused, RemoteEvent, RemoteSystem,
    System, WaitMode, BYTE_ORDER_NATIVE,
};
use thiserror::Error;

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("ET error: {0}")]
    Et(#[from] Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transfer failed after {transferred} events: {source}")]
    Interrupted {
        transferred: usize,
        #[source]
        source: Error,
    },
}

impl BridgeError {
    /// Whether the underlying ET handle is gone.
    pub fn is_terminal(&self) -> bool {
        match self {
            BridgeError::Et(e) | BridgeError::Interrupted { source: e, .. } => e.is_terminal(),
            BridgeError::Config(_) => false,
        }
    }
}

/// Outcome of a [`bridge`] call that did not fail.
#[derive(Debug)]
pub struct Transfer {
    /// Events copied into the destination.
    pub transferred: usize,
    /// Payload bytes copied.
    pub bytes: u64,
    /// Retryable condition that ended the call early (timeout, empty, wakeup).
    pub stopped: Option<Error>,
}

/// Header and payload access shared by local and remote events.
pub trait BridgeEvent {
    fn length(&self) -> usize;
    fn capacity(&self) -> usize;
    fn priority(&self) -> Priority;
    fn set_priority(&mut self, priority: Priority);
    fn byte_order(&self) -> u32;
    fn set_byte_order(&mut self, byte_order: u32);
    fn control(&self) -> ControlWords;
    fn set_control(&mut self, control: ControlWords);

    /// Run `f` over the valid payload.
    fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R;

    /// Copy `payload` in, then apply `swap` to the copied bytes.
    fn fill(&mut self, payload: &[u8], swap: Option<&SwapFn>) -> et::Result<()>;
}

/// The event operations the bridge needs from a system.
pub trait Endpoint {
    type Event: BridgeEvent;

    fn event_size(&self) -> usize;

    fn get_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        count: usize,
    ) -> et::Result<Vec<Self::Event>>;

    fn new_events(
        &self,
        att: AttachmentId,
        mode: WaitMode,
        size: usize,
        count: usize,
    ) -> et::Result<Vec<Self::Event>>;

    /// Put events; a refused put hands them back.
    fn put_events(
        &self,
        att: AttachmentId,
        events: Vec<Self::Event>,
    ) -> Result<(), Refused<Self::Event>>;

    fn dump_events(&self, att: AttachmentId, events: Vec<Self::Event>) -> et::Result<()>;
}

macro_rules! event_accessors {
    () => {
        fn length(&self) -> usize {
            Self::length(self)
        }

        fn capacity(&self) -> usize {
            Self::capacity(self)
        }

        fn priority(&self) -> Priority {
            Self::priority(self)
        }

        fn set_priority(&mut self, priority: Priority) {
            Self::set_priority(self, priority)
        }

        fn byte_order(&self) -> u32 {
            Self::byte_order(self)
        }

        fn set_byte_order(&mut self, byte_order: u32) {
            Self::set_byte_order(self, byte_order)
        }

        fn control(&self) -> ControlWords {
            Self::control(self)
        }

        fn set_control(&mut self, control: ControlWords) {
            Self::set_control(self, control)
        }
    };
}

impl BridgeEvent for Event {
    event_accessors!();

    fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data())
    }

    fn fill(&mut self, payload: &[u8], swap: Option<&SwapFn>) -> et::Result<()> {
        self.write(payload)?;
        if let Some(swap) = swap {
            swap(&mut self.buffer_mut()[..payload.len()]);
        }
        Ok(())
    }
}

impl BridgeEvent for RemoteEvent {
    event_accessors!();

    fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.data())
    }

    fn fill(&mut self, payload: &[u8], swap: Option<&SwapFn>) -> et::Result<()> {
        self.write(payload)?;
        if let Some(swap) = swap {
            swap(&mut self.buffer_mut()[..payload.len()]);
        }
        Ok(())
    }
}

macro_rules! endpoint_impl {
    ($system:ty, $event:ty) => {
        impl Endpoint for $system {
            type Event = $event;

            fn event_size(&self) -> usize {
                <$system>::event_size(self)
            }

            fn get_events(
                &self,
                att: AttachmentId,
                mode: WaitMode,
                count: usize,
            ) -> et::Result<Vec<$event>> {
                <$system>::get_events(self, att, mode, count)
            }

            fn new_events(
                &self,
                att: AttachmentId,
                mode: WaitMode,
                size: usize,
                count: usize,
            ) -> et::Result<Vec<$event>> {
                <$system>::new_events(self, att, mode, size, count)
            }

            fn put_events(
                &self,
                att: AttachmentId,
                events: Vec<$event>,
            ) -> Result<(), Refused<$event>> {
                <$system>::try_put_events(self, att, events)
            }

            fn dump_events(&self, att: AttachmentId, events: Vec<$event>) -> et::Result<()> {
                <$system>::dump_events(self, att, events)
            }
        }
    };
}

endpoint_impl!(System, Event);
endpoint_impl!(RemoteSystem, RemoteEvent);

/// Move up to `total` events from `from_att` (attached to a station of
/// `from`) into `to`, producing through `to_att`.
///
/// Sources are read `chunk_from` events at a time and destination events are
/// requested `chunk_to` at a time. A retryable condition (a source timeout,
/// for instance) ends the call with `Ok` and is reported in
/// [`Transfer::stopped`]. When a batch fails partway, the copies made so far
/// are still put and counted, unused new events are dumped and every
/// original goes back to `from`; the error is reported after that.
pub fn bridge<F, T>(
    from: &F,
    to: &T,
    from_att: AttachmentId,
    to_att: AttachmentId,
    config: &BridgeConfig,
    total: usize,
) -> Result<Transfer, BridgeError>
where
    F: Endpoint + ?Sized,
    T: Endpoint + ?Sized,
{
    if config.chunk_from < 1 || config.chunk_to < 1 {
        return Err(Error::BadArgument("bridge chunks must be at least 1".into()).into());
    }
    if total < 1 {
        return Err(Error::BadArgument("bridge total must be at least 1".into()).into());
    }

    let swap = config.swapper();
    let mut transfer = Transfer {
        transferred: 0,
        bytes: 0,
        stopped: None,
    };

    while transfer.transferred < total {
        let want = config.chunk_from.min(total - transfer.transferred);
        let originals = match from.get_events(from_att, config.wait_from(), want) {
            Ok(events) => events,
            Err(e) => return finish(transfer, e),
        };

        let (copies, mut failure) = copy_all(from, to, to_att, &originals, config, swap.as_ref());
        if !copies.is_empty() {
            let bytes: u64 = copies.iter().map(|c| c.length() as u64).sum();
            let count = copies.len();
            match to.put_events(to_att, copies) {
                Ok(()) => {
                    transfer.transferred += count;
                    transfer.bytes += bytes;
                    tracing::trace!("bridged {} events ({} bytes)", count, bytes);
                }
                Err(Refused { error, events }) => {
                    discard(to, to_att, events);
                    failure.get_or_insert(error);
                }
            }
        }

        if let Err(Refused { error, .. }) = from.put_events(from_att, originals) {
            tracing::warn!("could not return source events: {}", error);
            failure.get_or_insert(error);
        }
        if let Some(e) = failure {
            return finish(transfer, e);
        }
    }

    Ok(transfer)
}

fn finish(mut transfer: Transfer, e: Error) -> Result<Transfer, BridgeError> {
    if e.is_retryable() {
        transfer.stopped = Some(e);
        Ok(transfer)
    } else {
        Err(BridgeError::Interrupted {
            transferred: transfer.transferred,
            source: e,
        })
    }
}

/// Dump destination events the bridge will not put.
fn discard<T: Endpoint + ?Sized>(to: &T, att: AttachmentId, events: Vec<T::Event>) {
    if events.is_empty() {
        return;
    }
    if let Err(e) = to.dump_events(att, events) {
        tracing::warn!("could not dump unused events: {}", e);
    }
}

/// Copy `originals` into new destination events, in order.
///
/// Returns the filled copies, a prefix of `originals`, plus the error that
/// stopped the copy early, if any. Unused new events are already dumped.
fn copy_all<F, T>(
    from: &F,
    to: &T,
    to_att: AttachmentId,
    originals: &[F::Event],
    config: &BridgeConfig,
    swap: Option<&SwapFn>,
) -> (Vec<T::Event>, Option<Error>)
where
    F: Endpoint + ?Sized,
    T: Endpoint + ?Sized,
{
    let mut filled: Vec<T::Event> = Vec::with_capacity(originals.len());
    let mut failure = None;

    // the offset into `originals` is `filled.len()`, cumulative across batches
    while failure.is_none() && filled.len() < originals.len() {
        let want = config.chunk_to.min(originals.len() - filled.len());
        let mut fresh = match to.new_events(to_att, config.wait_to(), from.event_size(), want) {
            Ok(fresh) => fresh.into_iter(),
            Err(e) => {
                failure = Some(e);
                break;
            }
        };

        let mut spare = Vec::new();
        for copy in fresh.by_ref() {
            let Some(original) = originals.get(filled.len()) else {
                spare.push(copy);
                break;
            };
            match fill_one(to, to_att, config, original, copy, swap, &mut spare) {
                Ok(copy) => filled.push(copy),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        spare.extend(fresh);
        discard(to, to_att, spare);
    }

    (filled, failure)
}

/// Copy one original into `copy`, trading it for a larger temp event when
/// the payload does not fit. Events not handed back end up in `spare`.
fn fill_one<S, T>(
    to: &T,
    to_att: AttachmentId,
    config: &BridgeConfig,
    original: &S,
    mut copy: T::Event,
    swap: Option<&SwapFn>,
    spare: &mut Vec<T::Event>,
) -> et::Result<T::Event>
where
    S: BridgeEvent,
    T: Endpoint + ?Sized,
{
    if original.length() > copy.capacity() {
        spare.push(copy);
        let mut larger = to.new_events(to_att, config.wait_to(), original.length(), 1)?;
        copy = match larger.pop() {
            Some(event) => event,
            None => return Err(Error::Empty),
        };
        spare.append(&mut larger);
    }
    if let Err(e) = copy_event(original, &mut copy, swap) {
        spare.push(copy);
        return Err(e);
    }
    Ok(copy)
}

fn copy_event<S, D>(src: &S, dst: &mut D, swap: Option<&SwapFn>) -> et::Result<()>
where
    S: BridgeEvent + ?Sized,
    D: BridgeEvent + ?Sized,
{
    let swap = swap.filter(|_| src.byte_order() != BYTE_ORDER_NATIVE);
    src.with_payload(|payload| dst.fill(payload, swap))?;
    dst.set_priority(src.priority());
    dst.set_control(src.control());
    dst.set_byte_order(if swap.is_some() {
        src.byte_order().swap_bytes()
    } else {
        src.byte_order()
    });
    Ok(())
}
