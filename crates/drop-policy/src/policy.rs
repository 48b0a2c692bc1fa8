//! Drop Policy Implementation

use isp_protocol::OutputId;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Outcome for one completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Accept,
    Drop,
}

impl DropDecision {
    pub fn is_drop(self) -> bool {
        self == DropDecision::Drop
    }
}

/// Point-in-time view of the drop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DropSnapshot {
    pub enabled: bool,
    /// 0: nothing pending, > 0: frames left to drop, < 0: drop everything
    pub remaining: i32,
    /// Decision taken for the last primary frame
    pub current_frame_dropped: bool,
}

/// Per-session drop state
///
/// Configuration may come from a control thread while the dispatcher decides
/// on another. All three fields live in one `DropSnapshot` behind a single
/// lock, so every read and update sees them as one unit.
#[derive(Debug, Default)]
pub struct DropPolicy {
    state: Mutex<DropSnapshot>,
}

impl DropPolicy {
    /// Create a policy with dropping disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with an initial configuration
    pub fn with_config(enabled: bool, remaining: i32) -> Self {
        Self {
            state: Mutex::new(DropSnapshot {
                enabled,
                remaining: if enabled { remaining } else { 0 },
                current_frame_dropped: false,
            }),
        }
    }

    /// Turn dropping on or off; turning it off clears the pending count
    pub fn set_drop_enabled(&self, enabled: bool) {
        {
            let mut state = self.state.lock();
            state.enabled = enabled;
            if !enabled {
                state.remaining = 0;
            }
        }
        info!("Set drop frame enabled {}", enabled);
    }

    /// Set the number of frames to drop (negative drops everything)
    pub fn set_drop_count(&self, count: i32) {
        self.state.lock().remaining = count;
        info!("Set drop frame count {}", count);
    }

    /// Decide the fate of a frame completed on `output`
    pub fn decide(&self, output: OutputId) -> DropDecision {
        let (decision, after) = {
            let mut state = self.state.lock();
            let decision = match output {
                OutputId::Primary => decide_primary(&mut state),
                // Follows the primary frame of the same pair
                OutputId::Secondary if state.current_frame_dropped => DropDecision::Drop,
                _ => DropDecision::Accept,
            };
            (decision, *state)
        };

        if after.enabled {
            debug!(
                ?output,
                ?decision,
                remaining = after.remaining,
                current_frame_dropped = after.current_frame_dropped,
                "Drop frame decision"
            );
        }
        decision
    }

    /// Whether start-of-frame acknowledgements should be flagged to the consumer
    pub fn armed_without_pending(&self) -> bool {
        let state = self.state.lock();
        state.enabled && state.remaining == 0
    }

    /// Current state
    pub fn snapshot(&self) -> DropSnapshot {
        *self.state.lock()
    }
}

fn decide_primary(state: &mut DropSnapshot) -> DropDecision {
    state.current_frame_dropped = false;

    if !state.enabled {
        return DropDecision::Accept;
    }

    // 0 moves to -1 without dropping; the frame after that starts the drop-all run
    match state.remaining {
        0 => {
            state.remaining = -1;
            DropDecision::Accept
        }
        n => {
            if n > 0 {
                state.remaining = n - 1;
            }
            state.current_frame_dropped = true;
            DropDecision::Drop
        }
    }
}
