use std::time::Duration;

use serde::Deserialize;

use crate::{MAX_FRAME_SIZE, ROSTER_PROTOCOL};

/// what [`PipeManager::send`](crate::pipe::PipeManager::send) does when no channel can be
/// resolved for the peer
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveFailurePolicy {
    /// log the failure and return `Ok(())`
    #[default]
    Log,

    /// return the failure to the caller
    Propagate,
}

/// relay configuration
///
/// every field has a default, so a partial document deserializes fine
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flush_delay_ms: u64,
    pub broadcast_interval_ms: u64,
    pub roster_protocol: String,
    pub max_frame_size: usize,
    pub on_resolve_failure: ResolveFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_delay_ms: 100,
            broadcast_interval_ms: 30_000,
            roster_protocol: ROSTER_PROTOCOL.to_string(),
            max_frame_size: MAX_FRAME_SIZE,
            on_resolve_failure: ResolveFailurePolicy::Log,
        }
    }
}

impl Config {
    /// the wait between making sure a pipe exists and writing into it, gives a new pipe's drain
    /// task the chance to start
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_roster_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.roster_protocol = protocol.into();
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_resolve_failure_policy(mut self, policy: ResolveFailurePolicy) -> Self {
        self.on_resolve_failure = policy;
        self
    }
}
