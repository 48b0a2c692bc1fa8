//! Replay configuration
//!
//! Loaded from an optional TOML file, then overridden by `ISP_` environment
//! variables (nested fields use `__`, e.g. `ISP_SESSION__TOPOLOGY=raw`).

use anyhow::{bail, Context, Result};
use buffer_pool::{ArenaError, BufferArena, PoolLayout};
use ::config::{Config, Environment, File};
use isp_dispatch::{ControlCommand, SessionConfig};
use isp_protocol::{buf_evt, LogicalCaptureMode, OutputId, StatType, StatsRegion};
use serde::{Deserialize, Serialize};
use tracing::Level;

/// Buffer request raised by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferEvent {
    Start,
    StartRecording,
    Capture,
    OutputIrq,
}

impl BufferEvent {
    /// Raw engine code
    pub fn code(self) -> u32 {
        match self {
            BufferEvent::Start => buf_evt::START,
            BufferEvent::StartRecording => buf_evt::START_RECORDING,
            BufferEvent::Capture => buf_evt::CAPTURE,
            BufferEvent::OutputIrq => buf_evt::OUTPUT_IRQ,
        }
    }
}

/// One scripted step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Engine asks for buffer addresses
    Buffer { event: BufferEvent, output: OutputId },
    /// Engine finishes the oldest buffer bound to `output`
    Complete { output: OutputId, frame: u32 },
    /// Engine wrote statistics at `phys_addr`
    Stats {
        stat_type: StatType,
        frame: u32,
        phys_addr: u64,
    },
    /// Plain engine message
    Message { msg_id: u32, frame: u32 },
    /// Control command from the camera stack
    Control { command: ControlCommand },
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Dispatch session settings
    pub session: SessionConfig,

    /// Engine address of the first frame buffer
    pub pool_base_addr: u64,

    /// Frame buffers per capture mode
    pub pools: Vec<PoolLayout>,

    /// Registered statistics regions
    pub stats_regions: Vec<StatsRegion>,

    /// Script to replay
    pub steps: Vec<Step>,
}

const STATS_BASE_ADDR: u64 = 0x3000_0000;
const STATS_REGION_LEN: u32 = 0x2000;

impl Default for ReplayConfig {
    fn default() -> Self {
        let pools = [
            LogicalCaptureMode::Main,
            LogicalCaptureMode::Preview,
            LogicalCaptureMode::Thumbnail,
        ]
        .into_iter()
        .map(|mode| PoolLayout {
            mode,
            count: 4,
            frame_len: 0x10_0000,
        })
        .collect();

        let stats_regions = [StatType::Aec, StatType::Awb]
            .into_iter()
            .flat_map(|stat_type| std::iter::repeat(stat_type).take(3))
            .enumerate()
            .map(|(i, stat_type)| StatsRegion {
                stat_type,
                phys_addr: STATS_BASE_ADDR + i as u64 * STATS_REGION_LEN as u64,
                vaddr: i as u64 * STATS_REGION_LEN as u64,
                fd: 100 + i as i32,
                len: STATS_REGION_LEN,
                active: true,
            })
            .collect();

        Self {
            log_level: "info".to_string(),
            session: SessionConfig::default(),
            pool_base_addr: 0x1000_0000,
            pools,
            stats_regions,
            steps: demo_script(),
        }
    }
}

/// Preview stream with a bracketed burst and a topology switch
fn demo_script() -> Vec<Step> {
    use OutputId::{Primary, Secondary};

    let mut steps = vec![
        Step::Control {
            command: ControlCommand::EnableStats(StatType::Aec),
        },
        Step::Buffer {
            event: BufferEvent::Start,
            output: Primary,
        },
        Step::Buffer {
            event: BufferEvent::Start,
            output: Secondary,
        },
    ];

    for frame in 1..=3 {
        steps.push(Step::Message {
            msg_id: isp_protocol::msg_id::SOF_ACK,
            frame,
        });
        steps.push(Step::Complete {
            output: Primary,
            frame,
        });
        steps.push(Step::Complete {
            output: Secondary,
            frame,
        });
        steps.push(Step::Stats {
            stat_type: StatType::Aec,
            frame,
            phys_addr: STATS_BASE_ADDR + (frame as u64 - 1) % 3 * STATS_REGION_LEN as u64,
        });
    }

    steps.push(Step::Control {
        command: ControlCommand::EnableDropFrame(true),
    });
    steps.push(Step::Control {
        command: ControlCommand::SetDropFrameNum(1),
    });
    for frame in 4..=5 {
        steps.push(Step::Complete {
            output: Primary,
            frame,
        });
        steps.push(Step::Complete {
            output: Secondary,
            frame,
        });
    }

    steps.push(Step::Control {
        command: ControlCommand::SetOutputTopology(isp_protocol::OutputTopology::MainAndThumb),
    });
    steps.push(Step::Buffer {
        event: BufferEvent::Capture,
        output: Secondary,
    });
    steps.push(Step::Control {
        command: ControlCommand::DisableStats(StatType::Aec),
    });
    steps
}

impl ReplayConfig {
    /// Load configuration from `path` (if any) and the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("ISP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;

        let config: ReplayConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no session can run with
    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            bail!("At least one buffer pool is required");
        }
        if let Some(layout) = self.pools.iter().find(|l| l.frame_len == 0) {
            bail!("Buffer pool for {:?} has zero frame length", layout.mode);
        }
        if self.session.notify_queue_depth == 0 {
            bail!("Notification queue depth must be positive");
        }
        if self.log_level.parse::<Level>().is_err() {
            bail!(
                "Unknown log level {:?} (expected trace, debug, info, warn or error)",
                self.log_level
            );
        }
        self.build_arena().context("Invalid buffer pool layout")?;
        Ok(())
    }

    /// Build the frame buffer arena, packing pools back to back
    pub fn build_arena(&self) -> Result<BufferArena, ArenaError> {
        let mut base = self.pool_base_addr;
        let mut fd: i32 = 0;
        let mut buffers = Vec::new();
        for layout in &self.pools {
            buffers.extend(layout.descriptors(base, fd)?);
            let overflow = || ArenaError::LayoutOverflow(layout.mode);
            base = layout
                .span()
                .and_then(|span| base.checked_add(span))
                .ok_or_else(overflow)?;
            fd = i32::try_from(layout.count)
                .ok()
                .and_then(|count| fd.checked_add(count))
                .ok_or_else(overflow)?;
        }
        BufferArena::new(buffers)
    }
}
