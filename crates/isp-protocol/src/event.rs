//! Engine events
//!
//! [`RawEvent`] is what the engine's notification callback hands over, with
//! the numeric codes still unchecked. [`EventEnvelope::classify`] validates
//! those codes and produces a closed set of variants that carry only what
//! each event needs.

use serde::{Deserialize, Serialize};

use crate::buffer::FreeBuffer;
use crate::error::IspError;
use crate::stats::StatType;
use crate::topology::{LogicalCaptureMode, PhysicalOutputSlot};

/// Buffer request types carried by buffer events
pub mod buf_evt {
    pub const START: u32 = 0;
    pub const START_RECORDING: u32 = 1;
    pub const CAPTURE: u32 = 2;
    pub const OUTPUT_IRQ: u32 = 3;
}

/// Engine output identifiers
pub mod output_id {
    pub const P: u32 = 0;
    pub const V: u32 = 1;
    pub const T: u32 = 2;
    pub const S: u32 = 3;
    pub const PRIMARY: u32 = 4;
    pub const SECONDARY: u32 = 5;
}

/// Engine message identifiers
pub mod msg_id {
    pub const RESET_ACK: u32 = 0;
    pub const START_ACK: u32 = 1;
    pub const STOP_ACK: u32 = 2;
    pub const UPDATE_ACK: u32 = 3;
    pub const SNAPSHOT_DONE: u32 = 8;
    pub const STATS_AEC: u32 = 9;
    pub const STATS_AF: u32 = 10;
    pub const STATS_AWB: u32 = 11;
    pub const STATS_RS: u32 = 12;
    pub const STATS_CS: u32 = 13;
    pub const STATS_IHIST: u32 = 14;
    pub const EPOCH1: u32 = 19;
    pub const EPOCH2: u32 = 20;
    pub const SOF_ACK: u32 = 25;
    /// Start-of-frame acknowledge while a drop policy is armed
    pub const HDR_SOF_ACK: u32 = 0x100 | SOF_ACK;
}

/// Output that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputId {
    P,
    V,
    T,
    S,
    Primary,
    Secondary,
}

impl OutputId {
    /// Parse a raw output identifier
    pub fn from_raw(raw: u32) -> Result<Self, IspError> {
        match raw {
            output_id::P => Ok(OutputId::P),
            output_id::V => Ok(OutputId::V),
            output_id::T => Ok(OutputId::T),
            output_id::S => Ok(OutputId::S),
            output_id::PRIMARY => Ok(OutputId::Primary),
            output_id::SECONDARY => Ok(OutputId::Secondary),
            value => Err(IspError::InvalidEventKind {
                field: "output id",
                value,
            }),
        }
    }

    /// Raw identifier, as reported back to the consumer
    pub fn as_raw(self) -> u32 {
        match self {
            OutputId::P => output_id::P,
            OutputId::V => output_id::V,
            OutputId::T => output_id::T,
            OutputId::S => output_id::S,
            OutputId::Primary => output_id::PRIMARY,
            OutputId::Secondary => output_id::SECONDARY,
        }
    }

    /// Physical slot behind this output; legacy single-purpose outputs have none
    pub fn slot(self) -> Option<PhysicalOutputSlot> {
        match self {
            OutputId::Primary => Some(PhysicalOutputSlot::Primary),
            OutputId::Secondary => Some(PhysicalOutputSlot::Secondary),
            _ => None,
        }
    }
}

/// Frame handed to the post-processing engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcessFrame {
    pub frame_id: u32,
    pub mode: LogicalCaptureMode,
    pub phys_addr: u64,
    pub status: i32,
}

/// Unclassified event from the engine notification callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Engine needs buffer addresses programmed
    Buffer { event_type: u32, output_id: u32 },
    /// Engine finished writing `buffer`
    Output {
        output_id: u32,
        frame_counter: u32,
        buffer: FreeBuffer,
    },
    /// Statistics written at `phys_addr`
    Stats {
        stats_id: u32,
        frame_counter: u32,
        phys_addr: u64,
    },
    /// Plain engine message
    Message { msg_id: u32, sof_count: u32 },
    /// Post-processing engine completion
    PostProcess(PostProcessFrame),
    /// Notification type this core does not handle
    Unsupported { notification: u32 },
}

impl RawEvent {
    /// Buffer the engine gave up with this event, if any
    pub fn retired_buffer(&self) -> Option<&FreeBuffer> {
        match self {
            RawEvent::Output { buffer, .. } => Some(buffer),
            _ => None,
        }
    }
}

/// Classified engine event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEnvelope {
    Start { output: OutputId },
    StartRecording { output: OutputId },
    Capture { output: OutputId },
    OutputIrq { output: OutputId },
    OutputReady {
        output: OutputId,
        frame_id: u32,
        buffer: FreeBuffer,
    },
    StatsReady {
        stat_type: StatType,
        msg_id: u32,
        frame_id: u32,
        phys_addr: u64,
    },
    GenericMessage { msg_id: u32, frame_id: u32 },
    PostProcess(PostProcessFrame),
}

impl EventEnvelope {
    /// Validate the raw codes of an engine event
    pub fn classify(raw: RawEvent) -> Result<Self, IspError> {
        let envelope = match raw {
            RawEvent::Buffer {
                event_type,
                output_id,
            } => {
                let output = OutputId::from_raw(output_id)?;
                match event_type {
                    buf_evt::START => EventEnvelope::Start { output },
                    buf_evt::START_RECORDING => EventEnvelope::StartRecording { output },
                    buf_evt::CAPTURE => EventEnvelope::Capture { output },
                    buf_evt::OUTPUT_IRQ => EventEnvelope::OutputIrq { output },
                    value => {
                        return Err(IspError::InvalidEventKind {
                            field: "buffer event type",
                            value,
                        })
                    }
                }
            }
            RawEvent::Output {
                output_id,
                frame_counter,
                buffer,
            } => EventEnvelope::OutputReady {
                output: OutputId::from_raw(output_id)?,
                frame_id: frame_counter,
                buffer,
            },
            RawEvent::Stats {
                stats_id,
                frame_counter,
                phys_addr,
            } => EventEnvelope::StatsReady {
                stat_type: stat_type_of(stats_id)?,
                msg_id: stats_id,
                frame_id: frame_counter,
                phys_addr,
            },
            RawEvent::Message { msg_id, sof_count } => EventEnvelope::GenericMessage {
                msg_id,
                frame_id: sof_count,
            },
            RawEvent::PostProcess(frame) => EventEnvelope::PostProcess(frame),
            RawEvent::Unsupported { notification } => {
                return Err(IspError::InvalidEventKind {
                    field: "notification",
                    value: notification,
                })
            }
        };
        Ok(envelope)
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            EventEnvelope::Start { .. } => "start",
            EventEnvelope::StartRecording { .. } => "start_recording",
            EventEnvelope::Capture { .. } => "capture",
            EventEnvelope::OutputIrq { .. } => "output_irq",
            EventEnvelope::OutputReady { .. } => "output_ready",
            EventEnvelope::StatsReady { .. } => "stats_ready",
            EventEnvelope::GenericMessage { .. } => "message",
            EventEnvelope::PostProcess(_) => "post_process",
        }
    }
}

fn stat_type_of(stats_id: u32) -> Result<StatType, IspError> {
    match stats_id {
        msg_id::STATS_AEC => Ok(StatType::Aec),
        msg_id::STATS_AF => Ok(StatType::Af),
        msg_id::STATS_AWB => Ok(StatType::Awb),
        msg_id::STATS_RS => Ok(StatType::Rs),
        msg_id::STATS_CS => Ok(StatType::Cs),
        msg_id::STATS_IHIST => Ok(StatType::Ihist),
        value => Err(IspError::InvalidEventKind {
            field: "stats id",
            value,
        }),
    }
}
