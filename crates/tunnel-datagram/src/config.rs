//! Muxer configuration

use crate::error::{DatagramError, DatagramResult};
use crate::frame::DatagramVersion;
use crate::MAX_DATAGRAM_FRAME_SIZE;

/// What the receive loop does when a sink has no free capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullSinkPolicy {
    /// Wait for capacity. A slow consumer throttles the whole connection.
    #[default]
    Block,
    /// Drop the datagram and count it in the muxer stats
    Drop,
}

/// Muxer configuration
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Maximum wire size of one datagram frame
    pub max_frame_size: usize,

    /// Behaviour on a full sink
    pub full_sink_policy: FullSinkPolicy,

    /// Name recorded on the muxer's tracing span (e.g. the connection id)
    pub label: String,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_DATAGRAM_FRAME_SIZE,
            full_sink_policy: FullSinkPolicy::Block,
            label: String::new(),
        }
    }
}

impl MuxerConfig {
    /// Set the maximum datagram frame size
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set the full-sink policy
    pub fn with_full_sink_policy(mut self, policy: FullSinkPolicy) -> Self {
        self.full_sink_policy = policy;
        self
    }

    /// Set the tracing label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Validate the configuration for a protocol version
    ///
    /// The frame size must leave room for at least one payload byte after
    /// the version's fixed session overhead.
    pub fn validate(&self, version: DatagramVersion) -> DatagramResult<()> {
        if self.max_frame_size <= version.session_overhead() {
            return Err(DatagramError::InvalidConfig(format!(
                "max frame size {} must exceed {} overhead of {} bytes",
                self.max_frame_size,
                version,
                version.session_overhead()
            )));
        }

        if self.max_frame_size > u16::MAX as usize {
            return Err(DatagramError::InvalidConfig(format!(
                "max frame size {} exceeds the largest UDP payload",
                self.max_frame_size
            )));
        }

        Ok(())
    }
}
