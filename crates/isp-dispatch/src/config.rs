//! Session configuration

use isp_protocol::OutputTopology;
use serde::{Deserialize, Serialize};

/// Dispatch session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consumer notification queue depth
    pub notify_queue_depth: usize,

    /// Output topology at session start
    pub topology: OutputTopology,

    /// Drop policy armed at session start
    pub drop_enabled: bool,

    /// Initial drop count (negative drops every frame)
    pub drop_count: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            notify_queue_depth: 64,
            topology: OutputTopology::MainAndPreview,
            drop_enabled: false,
            drop_count: 0,
        }
    }
}

impl SessionConfig {
    /// Snapshot with thumbnail on the secondary output
    pub fn snapshot() -> Self {
        Self {
            topology: OutputTopology::MainAndThumb,
            ..Default::default()
        }
    }

    /// Recording with preview on the secondary output
    pub fn recording() -> Self {
        Self {
            topology: OutputTopology::VideoAndPreview,
            notify_queue_depth: 128,
            ..Default::default()
        }
    }

    /// Bracketed capture that discards the first `count` frame pairs
    pub fn bracketed(count: i32) -> Self {
        Self {
            topology: OutputTopology::MainAndThumb,
            drop_enabled: true,
            drop_count: count,
            ..Default::default()
        }
    }
}
