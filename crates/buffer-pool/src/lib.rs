//! Frame Buffer Arena
//!
//! Provides the fixed-capacity buffer pool the dispatcher reserves ping/pong
//! and replacement buffers from.

mod arena;

pub use arena::{ArenaError, ArenaStats, BufferArena, SlotOwner, MAX_ARENA_SLOTS};

use isp_protocol::{BufferDescriptor, LogicalCaptureMode};
use serde::{Deserialize, Serialize};

/// Buffers registered for one capture mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolLayout {
    /// Capture mode the buffers serve
    pub mode: LogicalCaptureMode,
    /// Number of buffers
    pub count: usize,
    /// Size of each buffer in bytes
    pub frame_len: u32,
}

impl PoolLayout {
    /// Synthetic descriptors for this layout, packed from `base_addr`
    pub fn descriptors(
        &self,
        base_addr: u64,
        first_fd: i32,
    ) -> Result<Vec<(LogicalCaptureMode, BufferDescriptor)>, ArenaError> {
        let overflow = || ArenaError::LayoutOverflow(self.mode);
        (0..self.count)
            .map(|i| {
                let offset = u64::try_from(i)
                    .ok()
                    .and_then(|i| i.checked_mul(u64::from(self.frame_len)))
                    .ok_or_else(overflow)?;
                let phys_addr = base_addr.checked_add(offset).ok_or_else(overflow)?;
                let fd = i32::try_from(i)
                    .ok()
                    .and_then(|i| first_fd.checked_add(i))
                    .ok_or_else(overflow)?;
                Ok((
                    self.mode,
                    BufferDescriptor {
                        phys_addr,
                        vaddr: offset,
                        fd,
                        len: self.frame_len,
                    },
                ))
            })
            .collect()
    }

    /// Bytes covered by all buffers of the layout
    pub fn span(&self) -> Option<u64> {
        u64::try_from(self.count)
            .ok()?
            .checked_mul(u64::from(self.frame_len))
    }
}
