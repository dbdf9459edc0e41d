//! Replica configuration.

use dsr_core::AgentId;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one replica.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// Numeric identity used in every dot this replica issues. Must be unique.
    pub agent_id: AgentId,
    /// Name used to address full-graph answers.
    pub agent_name: String,
    /// How long to wait for a full-graph answer per attempt (in milliseconds).
    pub sync_timeout_ms: u64,
    /// How often to check for an answer (in milliseconds).
    pub sync_poll_interval_ms: u64,
    /// Requests sent before starting alone.
    pub sync_attempts: u32,
    /// Capacity of the inbound merge queue.
    pub channel_capacity: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Graph to load at startup instead of asking peers.
    pub seed_file: Option<PathBuf>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            agent_id: 0,
            agent_name: "agent-0".to_string(),
            sync_timeout_ms: 1000,
            sync_poll_interval_ms: 50,
            sync_attempts: 3,
            channel_capacity: 1024,
            event_capacity: 100,
            seed_file: None,
        }
    }
}

impl ReplicaConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms.max(1))
    }
}

/// Builder for replica configuration.
pub struct ReplicaConfigBuilder {
    config: ReplicaConfig,
}

impl ReplicaConfigBuilder {
    pub fn new(agent_id: AgentId, agent_name: impl Into<String>) -> Self {
        Self {
            config: ReplicaConfig {
                agent_id,
                agent_name: agent_name.into(),
                ..ReplicaConfig::default()
            },
        }
    }

    pub fn sync_timeout(mut self, ms: u64) -> Self {
        self.config.sync_timeout_ms = ms;
        self
    }

    pub fn sync_poll_interval(mut self, ms: u64) -> Self {
        self.config.sync_poll_interval_ms = ms;
        self
    }

    pub fn sync_attempts(mut self, attempts: u32) -> Self {
        self.config.sync_attempts = attempts;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn seed_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.seed_file = Some(path.into());
        self
    }

    pub fn build(self) -> ReplicaConfig {
        self.config
    }
}
