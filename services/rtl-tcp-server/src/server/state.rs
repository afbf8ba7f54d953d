//! Server lifecycle state and streaming counters

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lifecycle of the server, in the order it is normally walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServerState {
    Uninitialized = 0,
    Initialized = 1,
    SocketOpen = 2,
    ClientOpen = 3,
    ClientOpenAsyncStarted = 4,
    ClientServing = 5,
    NeedsStopping = 6,
}

impl ServerState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Initialized,
            2 => Self::SocketOpen,
            3 => Self::ClientOpen,
            4 => Self::ClientOpenAsyncStarted,
            5 => Self::ClientServing,
            6 => Self::NeedsStopping,
            _ => Self::Uninitialized,
        }
    }

    /// Socket is up but nobody is being fed samples yet
    pub fn is_waiting_for_client(self) -> bool {
        matches!(
            self,
            Self::SocketOpen | Self::ClientOpen | Self::ClientOpenAsyncStarted
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Streaming statistics (atomic for access from every server thread)
#[derive(Debug, Default)]
pub struct StreamStats {
    bytes_sent: AtomicU64,
    chunks_queued: AtomicU64,
    chunks_dropped: AtomicU64,
    commands_received: AtomicU64,
    clients_served: AtomicU64,
    leaked_buffers: AtomicU64,
    last_client_at_ms: AtomicI64,
}

impl StreamStats {
    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.chunks_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client(&self) {
        self.clients_served.fetch_add(1, Ordering::Relaxed);
        self.last_client_at_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_leaks(&self, count: usize) {
        self.leaked_buffers.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn get_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn get_queued(&self) -> u64 {
        self.chunks_queued.load(Ordering::Relaxed)
    }

    pub fn get_dropped(&self) -> u64 {
        self.chunks_dropped.load(Ordering::Relaxed)
    }

    pub fn get_commands(&self) -> u64 {
        self.commands_received.load(Ordering::Relaxed)
    }

    pub fn get_clients(&self) -> u64 {
        self.clients_served.load(Ordering::Relaxed)
    }

    pub fn get_leaks(&self) -> u64 {
        self.leaked_buffers.load(Ordering::Relaxed)
    }

    /// Unix millis of the last accepted client, 0 if none yet
    pub fn get_last_client_at_ms(&self) -> i64 {
        self.last_client_at_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(ServerState::SocketOpen < ServerState::ClientOpenAsyncStarted);
        assert!(ServerState::ClientServing > ServerState::ClientOpenAsyncStarted);
        for raw in 0..=6u8 {
            assert_eq!(ServerState::from_u8(raw) as u8, raw);
        }
        assert_eq!(ServerState::from_u8(200), ServerState::Uninitialized);
    }

    #[test]
    fn test_waiting_for_client() {
        assert!(ServerState::SocketOpen.is_waiting_for_client());
        assert!(ServerState::ClientOpenAsyncStarted.is_waiting_for_client());
        assert!(!ServerState::ClientServing.is_waiting_for_client());
        assert!(!ServerState::Initialized.is_waiting_for_client());
    }

    #[test]
    fn test_stats_counters() {
        let stats = StreamStats::default();
        stats.record_sent(12);
        stats.record_sent(4);
        stats.record_client();
        assert_eq!(stats.get_sent(), 16);
        assert_eq!(stats.get_clients(), 1);
        assert!(stats.get_last_client_at_ms() > 0);
        assert_eq!(StreamStats::default().get_last_client_at_ms(), 0);
    }
}
