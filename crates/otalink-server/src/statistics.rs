//! Broadcaster statistics.
//!
//! Tracks:
//! - Ticks broadcast
//! - Connected observers
//! - Observers removed after a failed or stalled delivery
//! - Broadcaster uptime
//!
//! The numbers are reported in each tick's diagnostic line.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Point-in-time copy of the broadcaster counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    /// Ticks delivered to at least one observer.
    pub ticks: u64,

    /// Observers currently connected.
    pub observers: usize,

    /// Observers dropped because delivery failed.
    pub observers_dropped: u64,

    /// Seconds since the broadcaster was created.
    pub uptime: u64,
}

/// Collects broadcaster counters.
pub struct BroadcastStatistics {
    start_time: Instant,
    ticks: AtomicU64,
    observers: AtomicUsize,
    observers_dropped: AtomicU64,
}

impl BroadcastStatistics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ticks: AtomicU64::new(0),
            observers: AtomicUsize::new(0),
            observers_dropped: AtomicU64::new(0),
        }
    }

    /// Record a broadcast tick, returning its number (starting at 1).
    pub fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn observer_connected(&self) {
        self.observers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observer_disconnected(&self) {
        self.observers.fetch_sub(1, Ordering::Relaxed);
    }

    /// An observer was removed because delivery to it failed.
    pub fn observer_dropped(&self) {
        self.observers_dropped.fetch_add(1, Ordering::Relaxed);
        self.observer_disconnected();
    }

    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            observers: self.observers.load(Ordering::Relaxed),
            observers_dropped: self.observers_dropped.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for BroadcastStatistics {
    fn default() -> Self {
        Self::new()
    }
}
