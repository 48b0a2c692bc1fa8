//! Statistics buffer types

use serde::{Deserialize, Serialize};

use crate::error::IspError;
use crate::event::msg_id;

/// Maximum number of buffers the engine cycles per statistic
pub const NUM_STAT_OUTPUT_BUFFERS: usize = 3;

/// Statistic collected by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    /// Auto focus
    Af,
    /// Auto exposure
    Aec,
    /// Auto white balance
    Awb,
    /// Image histogram
    Ihist,
    /// Row sum
    Rs,
    /// Column sum
    Cs,
}

impl StatType {
    /// Engine message id announcing a buffer of this type
    pub fn msg_id(self) -> u32 {
        match self {
            StatType::Af => msg_id::STATS_AF,
            StatType::Aec => msg_id::STATS_AEC,
            StatType::Awb => msg_id::STATS_AWB,
            StatType::Ihist => msg_id::STATS_IHIST,
            StatType::Rs => msg_id::STATS_RS,
            StatType::Cs => msg_id::STATS_CS,
        }
    }

    /// Hardware command that returns a buffer of this type to the engine
    pub fn release_command(self) -> &'static str {
        match self {
            StatType::Af => "STATS_AF_BUF_RELEASE",
            StatType::Aec => "STATS_AEC_BUF_RELEASE",
            StatType::Awb => "STATS_AWB_BUF_RELEASE",
            StatType::Ihist => "STATS_IHIST_BUF_RELEASE",
            StatType::Rs => "STATS_RS_BUF_RELEASE",
            StatType::Cs => "STATS_CS_BUF_RELEASE",
        }
    }

    /// Hardware command that stops collection of this statistic
    pub fn disable_command(self) -> &'static str {
        match self {
            StatType::Af => "STATS_AF_STOP",
            StatType::Aec => "STATS_AEC_STOP",
            StatType::Awb => "STATS_AWB_STOP",
            StatType::Ihist => "STATS_IHIST_STOP",
            StatType::Rs => "STATS_RS_STOP",
            StatType::Cs => "STATS_CS_STOP",
        }
    }

    /// Hardware command that starts collection of this statistic
    pub fn enable_command(self) -> &'static str {
        match self {
            StatType::Af => "STATS_AF_ENABLE",
            StatType::Aec => "STATS_AEC_ENABLE",
            StatType::Awb => "STATS_AWB_ENABLE",
            StatType::Ihist => "STATS_IHIST_ENABLE",
            StatType::Rs => "STATS_RS_ENABLE",
            StatType::Cs => "STATS_CS_ENABLE",
        }
    }
}

/// Registered statistics memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRegion {
    pub stat_type: StatType,
    /// Address the engine writes to and reports
    pub phys_addr: u64,
    /// Address of the region in the consumer mapping
    pub vaddr: u64,
    pub fd: i32,
    pub len: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Consumer-visible location of a statistics buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsBuffer {
    pub stat_type: StatType,
    pub vaddr: u64,
    pub fd: i32,
}

/// Address translation between engine and consumer views of stats memory
pub trait StatsLookup: Send + Sync {
    /// Map an engine-reported address to the consumer view
    fn translate(&self, phys_addr: u64) -> Option<StatsBuffer>;

    /// Map a consumer address back to the engine address
    fn reverse(&self, vaddr: u64, fd: i32) -> Option<u64>;

    /// Active regions of one statistic, at most `limit`
    fn active_regions(&self, stat_type: StatType, limit: usize) -> Vec<StatsRegion>;
}

/// Statistics commands of the imaging engine
pub trait StatsControl: Send + Sync {
    /// Give a consumed stats buffer back to the engine
    fn release_stats_buffer(&self, stat_type: StatType, phys_addr: u64) -> Result<(), IspError>;

    /// Start collecting a statistic into `regions`
    fn enable_stats(&self, stat_type: StatType, regions: &[StatsRegion]) -> Result<(), IspError>;

    /// Stop collecting a statistic
    fn disable_stats(&self, stat_type: StatType) -> Result<(), IspError>;
}
