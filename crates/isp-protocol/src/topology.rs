//! Output topology and image mode resolution
//!
//! The imaging engine writes frames through two physical output slots. Which
//! application stream each slot feeds depends on the configured output
//! topology, so the mapping is a fixed table indexed by topology and slot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::debug;

/// Active combination of engine outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTopology {
    /// Snapshot on primary, preview on secondary
    MainAndPreview,
    /// Snapshot on primary, video on secondary
    MainAndVideo,
    /// Snapshot on primary, thumbnail on secondary
    MainAndThumb,
    /// Thumbnail on primary, snapshot on secondary
    ThumbAndMain,
    /// Preview only
    Preview,
    /// Preview on primary, video on secondary
    PreviewAndVideo,
    /// Video only
    Video,
    /// Video on primary, preview on secondary
    VideoAndPreview,
    /// Raw snapshot on primary
    Raw,
    /// JPEG encoder output with thumbnail
    JpegAndThumb,
    /// Thumbnail with JPEG encoder output
    ThumbAndJpeg,
    /// Raw dump interface
    Rdi,
}

impl OutputTopology {
    /// All topologies, in table order
    pub const ALL: [OutputTopology; 12] = [
        OutputTopology::MainAndPreview,
        OutputTopology::MainAndVideo,
        OutputTopology::MainAndThumb,
        OutputTopology::ThumbAndMain,
        OutputTopology::Preview,
        OutputTopology::PreviewAndVideo,
        OutputTopology::Video,
        OutputTopology::VideoAndPreview,
        OutputTopology::Raw,
        OutputTopology::JpegAndThumb,
        OutputTopology::ThumbAndJpeg,
        OutputTopology::Rdi,
    ];

    /// Position of this topology in the resolution table
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Default for OutputTopology {
    fn default() -> Self {
        OutputTopology::MainAndPreview
    }
}

/// Physical pipeline stage that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOutputSlot {
    Primary,
    Secondary,
}

impl PhysicalOutputSlot {
    fn index(self) -> usize {
        match self {
            PhysicalOutputSlot::Primary => 0,
            PhysicalOutputSlot::Secondary => 1,
        }
    }
}

/// Application-visible role of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalCaptureMode {
    Main,
    Thumbnail,
    Video,
    Preview,
}

impl LogicalCaptureMode {
    /// All capture modes
    pub const ALL: [LogicalCaptureMode; 4] = [
        LogicalCaptureMode::Main,
        LogicalCaptureMode::Thumbnail,
        LogicalCaptureMode::Video,
        LogicalCaptureMode::Preview,
    ];
}

use LogicalCaptureMode::{Main, Preview, Thumbnail, Video};

/// Capture mode per topology: `[primary, secondary]`
const MODE_TABLE: [[Option<LogicalCaptureMode>; 2]; 12] = [
    /* MainAndPreview  */ [Some(Main), Some(Preview)],
    /* MainAndVideo    */ [Some(Main), Some(Video)],
    /* MainAndThumb    */ [Some(Main), Some(Thumbnail)],
    /* ThumbAndMain    */ [Some(Thumbnail), Some(Main)],
    /* Preview         */ [Some(Preview), None],
    /* PreviewAndVideo */ [Some(Preview), Some(Video)],
    /* Video           */ [Some(Video), None],
    /* VideoAndPreview */ [Some(Video), Some(Preview)],
    /* Raw             */ [Some(Main), None],
    /* JpegAndThumb    */ [None, None],
    /* ThumbAndJpeg    */ [None, None],
    /* Rdi             */ [None, None],
];

/// Resolve the logical capture mode for an output slot
///
/// Returns `None` when the topology does not route anything through the slot.
pub fn resolve(slot: PhysicalOutputSlot, topology: OutputTopology) -> Option<LogicalCaptureMode> {
    let mode = MODE_TABLE[topology.index()][slot.index()];
    debug!(?slot, ?topology, ?mode, "Resolved image mode");
    mode
}

/// Shared, lock-free holder of the current output topology
///
/// Written by configuration, read once per dispatch.
#[derive(Debug)]
pub struct TopologyCell {
    index: AtomicU8,
}

impl TopologyCell {
    /// Create a cell holding `topology`
    pub fn new(topology: OutputTopology) -> Self {
        Self {
            index: AtomicU8::new(topology.index() as u8),
        }
    }

    /// Current topology
    pub fn load(&self) -> OutputTopology {
        let index = self.index.load(Ordering::Acquire) as usize;
        // Only `store` writes the cell, always with a valid index
        OutputTopology::ALL[index % OutputTopology::ALL.len()]
    }

    /// Replace the topology; takes effect from the next dispatch
    pub fn store(&self, topology: OutputTopology) {
        self.index.store(topology.index() as u8, Ordering::Release);
    }
}

impl Default for TopologyCell {
    fn default() -> Self {
        Self::new(OutputTopology::default())
    }
}
