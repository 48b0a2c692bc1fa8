//! Dispatch session
//!
//! Owns the shared state of one camera session and applies control commands
//! concurrently with event dispatch.

use drop_policy::{DropPolicy, DropSnapshot};
use isp_protocol::{
    BufferPool, HardwareConfig, IspError, OutputTopology, RawEvent, StatType, StatsControl,
    StatsLookup, TopologyCell, NUM_STAT_OUTPUT_BUFFERS,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::control::{ControlCommand, CropStore};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::notify::{Notification, NotificationSender};

/// Platform services a session runs on
#[derive(Clone)]
pub struct Backends {
    pub pool: Arc<dyn BufferPool>,
    pub hardware: Arc<dyn HardwareConfig>,
    pub stats: Arc<dyn StatsLookup>,
    pub stats_control: Arc<dyn StatsControl>,
}

/// One streaming session of the imaging engine
pub struct IspSession {
    dispatcher: Dispatcher,
    topology: Arc<TopologyCell>,
    policy: Arc<DropPolicy>,
    stats: Arc<dyn StatsLookup>,
    stats_control: Arc<dyn StatsControl>,
    crop: CropStore,
}

impl IspSession {
    /// Create a session and the receiving end of its notification queue
    pub fn new(config: SessionConfig, backends: Backends) -> (Self, mpsc::Receiver<Notification>) {
        let (notifier, rx) = NotificationSender::channel(config.notify_queue_depth);
        let topology = Arc::new(TopologyCell::new(config.topology));
        let policy = Arc::new(DropPolicy::with_config(
            config.drop_enabled,
            config.drop_count,
        ));

        info!(
            topology = ?config.topology,
            queue_depth = config.notify_queue_depth,
            drop_enabled = config.drop_enabled,
            "ISP session created"
        );

        let dispatcher = Dispatcher::new(
            backends.pool,
            backends.hardware,
            backends.stats.clone(),
            backends.stats_control.clone(),
            topology.clone(),
            policy.clone(),
            notifier,
        );

        let session = Self {
            dispatcher,
            topology,
            policy,
            stats: backends.stats,
            stats_control: backends.stats_control,
            crop: CropStore::new(),
        };
        (session, rx)
    }

    /// Handle one engine event
    pub fn dispatch(&self, event: RawEvent) -> Result<DispatchOutcome, IspError> {
        self.dispatcher.dispatch(event)
    }

    /// Apply a control command
    pub fn apply(&self, command: ControlCommand) -> Result<(), IspError> {
        let name = command.name();
        let result = match command {
            ControlCommand::EnableDropFrame(enabled) => {
                self.policy.set_drop_enabled(enabled);
                Ok(())
            }
            ControlCommand::SetDropFrameNum(count) => {
                self.policy.set_drop_count(count);
                Ok(())
            }
            ControlCommand::ReleaseStatsBuffer {
                stat_type,
                vaddr,
                fd,
            } => self.release_stats_buffer(stat_type, vaddr, fd),
            ControlCommand::EnableStats(stat_type) => self.enable_stats(stat_type),
            ControlCommand::DisableStats(stat_type) => {
                info!(?stat_type, "Disabling statistics");
                self.stats_control.disable_stats(stat_type)
            }
            ControlCommand::SetCrop(data) => self.crop.set(&data),
            ControlCommand::SetOutputTopology(topology) => {
                self.topology.store(topology);
                info!(?topology, "Output topology changed");
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(command = name, "Control command failed: {}", e);
        }
        result
    }

    fn release_stats_buffer(&self, stat_type: StatType, vaddr: u64, fd: i32) -> Result<(), IspError> {
        let phys_addr = self.stats.reverse(vaddr, fd).ok_or_else(|| {
            warn!(?stat_type, vaddr, fd, "Stats buffer not registered");
            IspError::InvalidArgument("unknown stats buffer")
        })?;
        self.stats_control.release_stats_buffer(stat_type, phys_addr)
    }

    fn enable_stats(&self, stat_type: StatType) -> Result<(), IspError> {
        let regions = self.stats.active_regions(stat_type, NUM_STAT_OUTPUT_BUFFERS);
        if regions.is_empty() {
            return Err(IspError::InvalidArgument("no stats regions registered"));
        }
        info!(?stat_type, regions = regions.len(), "Enabling statistics");
        self.stats_control.enable_stats(stat_type, &regions)
    }

    /// Current output topology
    pub fn topology(&self) -> OutputTopology {
        self.topology.load()
    }

    /// Current drop policy state
    pub fn drop_state(&self) -> DropSnapshot {
        self.policy.snapshot()
    }

    /// Current crop parameters
    pub fn crop(&self) -> Option<Vec<u8>> {
        self.crop.get()
    }
}
