//! Muxer counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the muxer
#[derive(Debug, Default)]
pub struct MuxerStats {
    sessions_sent: AtomicU64,
    packets_sent: AtomicU64,
    sessions_delivered: AtomicU64,
    packets_delivered: AtomicU64,
    malformed_dropped: AtomicU64,
    sink_full_dropped: AtomicU64,
    no_sink_dropped: AtomicU64,
}

/// Point-in-time copy of [`MuxerStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxerStatsSnapshot {
    /// Session frames handed to the transport
    pub sessions_sent: u64,

    /// Packet frames handed to the transport
    pub packets_sent: u64,

    /// Session datagrams handed to the session sink
    pub sessions_delivered: u64,

    /// Raw packets handed to the packet sink
    pub packets_delivered: u64,

    /// Inbound frames that failed to decode
    pub malformed_dropped: u64,

    /// Inbound datagrams dropped under [`FullSinkPolicy::Drop`](crate::FullSinkPolicy::Drop)
    pub sink_full_dropped: u64,

    /// Inbound datagrams with no sink configured, or whose sink was closed
    pub no_sink_dropped: u64,
}

impl MuxerStats {
    pub fn snapshot(&self) -> MuxerStatsSnapshot {
        MuxerStatsSnapshot {
            sessions_sent: self.sessions_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            sessions_delivered: self.sessions_delivered.load(Ordering::Relaxed),
            packets_delivered: self.packets_delivered.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            sink_full_dropped: self.sink_full_dropped.load(Ordering::Relaxed),
            no_sink_dropped: self.no_sink_dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_session_sent(&self) {
        self.sessions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_delivered(&self) {
        self.sessions_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_packet_delivered(&self) {
        self.packets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_full(&self) {
        self.sink_full_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_no_sink(&self) {
        self.no_sink_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_default() {
        let stats = MuxerStats::default();
        assert_eq!(stats.snapshot(), MuxerStatsSnapshot::default());
    }

    #[test]
    fn test_counters() {
        let stats = MuxerStats::default();
        stats.record_session_sent();
        stats.record_session_sent();
        stats.record_packet_delivered();
        stats.record_malformed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions_sent, 2);
        assert_eq!(snapshot.packets_delivered, 1);
        assert_eq!(snapshot.malformed_dropped, 1);
        assert_eq!(snapshot.sink_full_dropped, 0);
    }
}
