//! Simulated imaging engine

use isp_protocol::{
    BufferBinding, FreeBuffer, HardwareConfig, IspError, OutputId, StatType, StatsControl,
    StatsRegion,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Engine stand-in that remembers which buffers each output writes next
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    bound: Mutex<HashMap<OutputId, VecDeque<FreeBuffer>>>,
    stats_released: Mutex<Vec<(StatType, u64)>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish the oldest buffer bound to `output`
    pub fn retire(&self, output: OutputId) -> Option<FreeBuffer> {
        self.bound.lock().get_mut(&output)?.pop_front()
    }

    /// Stats buffers the consumer gave back
    pub fn stats_released(&self) -> Vec<(StatType, u64)> {
        self.stats_released.lock().clone()
    }
}

impl HardwareConfig for SimulatedEngine {
    fn configure(&self, binding: &BufferBinding) -> Result<(), IspError> {
        let mut bound = self.bound.lock();
        let queue = bound.entry(binding.output).or_default();
        // Aliased ping/pong writes one buffer twice
        if !queue.iter().any(|b| b.handle == binding.buffer.handle) {
            queue.push_back(binding.buffer);
        }
        debug!(
            command = binding.target.command(),
            output = ?binding.output,
            phys_addr = binding.buffer.desc.phys_addr,
            "Engine register write"
        );
        Ok(())
    }
}

impl StatsControl for SimulatedEngine {
    fn release_stats_buffer(&self, stat_type: StatType, phys_addr: u64) -> Result<(), IspError> {
        debug!(
            command = stat_type.release_command(),
            phys_addr,
            "Engine stats release"
        );
        self.stats_released.lock().push((stat_type, phys_addr));
        Ok(())
    }

    fn enable_stats(&self, stat_type: StatType, regions: &[StatsRegion]) -> Result<(), IspError> {
        info!(
            command = stat_type.enable_command(),
            regions = regions.len(),
            "Engine stats enabled"
        );
        Ok(())
    }

    fn disable_stats(&self, stat_type: StatType) -> Result<(), IspError> {
        info!(command = stat_type.disable_command(), "Engine stats disabled");
        Ok(())
    }
}
