//! Engine configuration

use std::time::Duration;

/// Rotation period: how long each event pair is collected
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Bound on waiting for workers to acknowledge a handoff command
pub const DEFAULT_DEADMAN: Duration = Duration::from_secs(1);
/// Sleep between acknowledgement polls
pub const DEFAULT_ACK_POLL: Duration = Duration::from_millis(1);

/// What happens to captured records when a new run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureRetention {
    /// Every run starts from an empty capture
    #[default]
    ResetOnStart,
    /// Records of earlier runs are kept and appended to
    Accumulate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub deadman: Duration,
    pub ack_poll: Duration,
    pub capture_retention: CaptureRetention,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadman: DEFAULT_DEADMAN,
            ack_poll: DEFAULT_ACK_POLL,
            capture_retention: CaptureRetention::default(),
        }
    }
}
