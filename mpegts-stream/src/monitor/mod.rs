//! UDP stream monitoring.
//!
//! A [`UdpStreamMonitor`] owns one socket and a receive task. The task feeds
//! a [`StreamProcessor`], which writes chunk files and hands finished chunks
//! to the rollover action on the blocking pool.

mod chunk;
mod processor;
mod registry;
#[cfg(test)]
mod testing;
mod udp;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

pub use processor::StreamProcessor;
pub use registry::MonitorRegistry;
pub use udp::{MonitorStatus, UdpStreamMonitor};

/// Lifecycle of a monitored stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Stopped,
    Starting,
    Monitoring,
    RollingOver,
    Stopping,
}

impl MonitorState {
    fn as_u8(self) -> u8 {
        match self {
            MonitorState::Stopped => 0,
            MonitorState::Starting => 1,
            MonitorState::Monitoring => 2,
            MonitorState::RollingOver => 3,
            MonitorState::Stopping => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorState::Starting,
            2 => MonitorState::Monitoring,
            3 => MonitorState::RollingOver,
            4 => MonitorState::Stopping,
            _ => MonitorState::Stopped,
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Stopped => "STOPPED",
            MonitorState::Starting => "STARTING",
            MonitorState::Monitoring => "MONITORING",
            MonitorState::RollingOver => "ROLLING_OVER",
            MonitorState::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: MonitorState,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chunk I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("No stream named {0}")]
    NotFound(String),

    #[error("A stream named {0} already exists")]
    AlreadyExists(String),
}

/// Counters shared between the receive task and status readers.
#[derive(Debug, Default)]
pub struct MonitorStats {
    datagrams: AtomicU64,
    bytes_received: AtomicU64,
    datagrams_dropped: AtomicU64,
    continuity_errors: AtomicU64,
    samples: AtomicU64,
    chunks_started: AtomicU64,
    chunks_committed: AtomicU64,
    chunks_lost: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStatsSnapshot {
    pub datagrams: u64,
    pub bytes_received: u64,
    pub datagrams_dropped: u64,
    pub continuity_errors: u64,
    pub samples: u64,
    pub chunks_started: u64,
    pub chunks_committed: u64,
    pub chunks_lost: u64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_datagram(&self, bytes: usize) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Returns the new drop count.
    pub(crate) fn record_dropped(&self) -> u64 {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_continuity_errors(&self, count: u64) {
        self.continuity_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_samples(&self, count: usize) {
        self.samples.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk_started(&self) {
        self.chunks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk_committed(&self) {
        self.chunks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk_lost(&self) {
        self.chunks_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        MonitorStatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            continuity_errors: self.continuity_errors.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            chunks_started: self.chunks_started.load(Ordering::Relaxed),
            chunks_committed: self.chunks_committed.load(Ordering::Relaxed),
            chunks_lost: self.chunks_lost.load(Ordering::Relaxed),
        }
    }
}

/// Atomic cell holding a [`MonitorState`].
#[derive(Debug)]
pub(crate) struct StateCell(std::sync::atomic::AtomicU8);

impl StateCell {
    pub(crate) fn new(state: MonitorState) -> Self {
        Self(std::sync::atomic::AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> MonitorState {
        MonitorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: MonitorState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_round_trips_every_state() {
        let cell = StateCell::new(MonitorState::Stopped);
        for state in [
            MonitorState::Starting,
            MonitorState::Monitoring,
            MonitorState::RollingOver,
            MonitorState::Stopping,
            MonitorState::Stopped,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
        assert_eq!(MonitorState::RollingOver.to_string(), "ROLLING_OVER");
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = MonitorStats::new();
        stats.record_datagram(1316);
        stats.record_datagram(188);
        assert_eq!(stats.record_dropped(), 1);
        stats.record_chunk_started();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.datagrams, 2);
        assert_eq!(snapshot.bytes_received, 1504);
        assert_eq!(snapshot.datagrams_dropped, 1);
        assert_eq!(snapshot.chunks_started, 1);

        assert_eq!(stats.last_error(), None);
        stats.record_error("chunk #1 lost");
        assert_eq!(stats.last_error().as_deref(), Some("chunk #1 lost"));
    }
}
