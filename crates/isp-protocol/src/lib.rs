//! Imaging Engine Protocol
//!
//! Shared vocabulary of the ISP event core:
//! - Output topologies and the slot to capture-mode resolution table
//! - Raw engine events and their classified envelopes
//! - Frame buffer handles and statistics buffers
//! - Interfaces of the buffer pool, the engine and the stats address table

mod buffer;
mod error;
mod event;
mod stats;
mod topology;

pub use buffer::{
    BindingTarget, BufferBinding, BufferDescriptor, BufferHandle, BufferPool, FreeBuffer,
    HardwareConfig,
};
pub use error::IspError;
pub use event::{buf_evt, msg_id, output_id, EventEnvelope, OutputId, PostProcessFrame, RawEvent};
pub use stats::{
    StatType, StatsBuffer, StatsControl, StatsLookup, StatsRegion, NUM_STAT_OUTPUT_BUFFERS,
};
pub use topology::{
    resolve, LogicalCaptureMode, OutputTopology, PhysicalOutputSlot, TopologyCell,
};
