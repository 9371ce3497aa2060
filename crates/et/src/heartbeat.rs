// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveness heartbeat.
//!
//! A background thread bumps a counter every period. A system is alive while
//! the counter keeps moving; readers compare the last beat against the period.

use crate::error::{Error, Result};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Pulse {
    count: AtomicU64,
    last: Mutex<Instant>,
}

/// Running heartbeat thread plus the state it updates.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    pulse: Arc<Pulse>,
    period: Duration,
    stop: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Heartbeat {
    pub(crate) fn start(name: &str, period: Duration) -> Result<Self> {
        let pulse = Arc::new(Pulse {
            count: AtomicU64::new(0),
            last: Mutex::new(Instant::now()),
        });
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let beat = Arc::clone(&pulse);

        let handle = thread::Builder::new()
            .name(format!("et-heartbeat-{}", name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        beat.count.fetch_add(1, Ordering::Release);
                        *beat.last.lock() = Instant::now();
                    }
                }
            })
            .map_err(|e| Error::Generic(format!("failed to spawn heartbeat: {}", e)))?;

        Ok(Self {
            pulse,
            period,
            stop: Mutex::new(Some((stop_tx, handle))),
        })
    }

    /// Beats so far.
    pub(crate) fn count(&self) -> u64 {
        self.pulse.count.load(Ordering::Acquire)
    }

    /// Whether a beat happened within the last few periods.
    pub(crate) fn is_alive(&self) -> bool {
        if self.stop.lock().is_none() {
            return false;
        }
        self.pulse.last.lock().elapsed() < self.period * 3
    }

    /// Block until the next beat or `timeout`.
    pub(crate) fn wait_for_beat(&self, timeout: Duration) -> bool {
        let start = self.count();
        let deadline = Instant::now() + timeout;
        let step = (self.period / 4).max(Duration::from_millis(1));
        while Instant::now() < deadline {
            if self.count() != start {
                return true;
            }
            thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
        }
        self.count() != start
    }

    /// Stop the thread. Safe to call more than once.
    pub(crate) fn stop(&self) {
        let Some((tx, handle)) = self.stop.lock().take() else {
            return;
        };
        let _ = tx.send(());
        if handle.join().is_err() {
            log::error!("[Heartbeat] thread panicked");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beats_then_stops() {
        let hb = Heartbeat::start("test", Duration::from_millis(5)).unwrap();
        assert!(hb.is_alive());
        assert!(hb.wait_for_beat(Duration::from_secs(2)));
        assert!(hb.count() >= 1);

        hb.stop();
        assert!(!hb.is_alive());
        let frozen = hb.count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(hb.count(), frozen);
        hb.stop();
    }
}
