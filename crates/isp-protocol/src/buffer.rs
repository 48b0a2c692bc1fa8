//! Frame buffer handles and the interfaces that move them between stages

use serde::{Deserialize, Serialize};

use crate::error::IspError;
use crate::event::OutputId;
use crate::topology::LogicalCaptureMode;

/// Index of a buffer slot in the pool arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u16);

impl BufferHandle {
    /// Create a handle for arena slot `index`
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Arena slot index
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Memory backing a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferDescriptor {
    /// Device-visible address
    pub phys_addr: u64,
    /// Offset of the buffer inside the consumer mapping
    pub vaddr: u64,
    /// File descriptor of the backing allocation
    pub fd: i32,
    /// Length in bytes
    pub len: u32,
}

/// Buffer reserved from the pool for one capture mode
///
/// Copying the handle does not copy ownership: the pool tracks which stage
/// owns the slot, and every handoff goes through [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBuffer {
    pub handle: BufferHandle,
    pub mode: LogicalCaptureMode,
    pub desc: BufferDescriptor,
}

/// Engine register a buffer gets bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingTarget {
    Ping,
    Pong,
    FreeBufferAddress,
}

impl BindingTarget {
    /// Command name used in logs and hardware errors
    pub fn command(self) -> &'static str {
        match self {
            BindingTarget::Ping => "CONFIG_PING_ADDR",
            BindingTarget::Pong => "CONFIG_PONG_ADDR",
            BindingTarget::FreeBufferAddress => "CONFIG_FREE_BUF_ADDR",
        }
    }
}

/// A buffer-to-register binding the engine must be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub target: BindingTarget,
    pub output: OutputId,
    pub buffer: FreeBuffer,
}

/// Free buffer supply shared by the dispatcher and the consumer
///
/// Implementations must answer immediately: exhaustion is reported as
/// [`IspError::PoolExhausted`], never waited out.
pub trait BufferPool: Send + Sync {
    /// Take a free buffer for `mode`; the caller becomes the owner
    fn reserve(&self, mode: LogicalCaptureMode) -> Result<FreeBuffer, IspError>;

    /// Return a buffer to the free list
    fn release(&self, buffer: &FreeBuffer) -> Result<(), IspError>;

    /// Record that a hardware-held buffer now belongs to the consumer
    fn hand_off(&self, buffer: &FreeBuffer) -> Result<(), IspError>;
}

/// Buffer-address configuration entry of the imaging engine
pub trait HardwareConfig: Send + Sync {
    /// Bind `binding.buffer` to the register named by `binding.target`
    fn configure(&self, binding: &BufferBinding) -> Result<(), IspError>;
}
