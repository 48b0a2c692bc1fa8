//! Stats region table

use isp_protocol::{StatType, StatsBuffer, StatsLookup, StatsRegion};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Regions the table accepts (six statistics, a few buffers each)
pub const MAX_STATS_REGIONS: usize = 32;

/// Region registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("Stats table full ({0} regions)")]
    Full(usize),

    #[error("Stats region at {0:#x} already registered")]
    Duplicate(u64),

    #[error("No stats region at {0:#x}")]
    Unknown(u64),
}

/// Registered statistics regions
///
/// Lookups take a short read lock and never allocate; registration happens
/// from the control path only.
#[derive(Debug, Default)]
pub struct StatsRegionTable {
    regions: RwLock<Vec<StatsRegion>>,
}

impl StatsRegionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(Vec::with_capacity(MAX_STATS_REGIONS)),
        }
    }

    /// Create a table pre-populated with `regions`
    pub fn with_regions<I>(regions: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = StatsRegion>,
    {
        let table = Self::new();
        for region in regions {
            table.register(region)?;
        }
        Ok(table)
    }

    /// Add a region
    pub fn register(&self, region: StatsRegion) -> Result<(), TableError> {
        let mut regions = self.regions.write();
        if regions.len() >= MAX_STATS_REGIONS {
            return Err(TableError::Full(MAX_STATS_REGIONS));
        }
        if regions.iter().any(|r| r.phys_addr == region.phys_addr) {
            return Err(TableError::Duplicate(region.phys_addr));
        }
        info!(
            stat_type = ?region.stat_type,
            phys_addr = region.phys_addr,
            len = region.len,
            "Registered stats region"
        );
        regions.push(region);
        Ok(())
    }

    /// Remove the region engine-addressed at `phys_addr`
    pub fn unregister(&self, phys_addr: u64) -> Result<StatsRegion, TableError> {
        let mut regions = self.regions.write();
        let index = regions
            .iter()
            .position(|r| r.phys_addr == phys_addr)
            .ok_or(TableError::Unknown(phys_addr))?;
        Ok(regions.swap_remove(index))
    }

    /// Mark a region as usable or not without removing it
    pub fn set_active(&self, phys_addr: u64, active: bool) -> Result<(), TableError> {
        let mut regions = self.regions.write();
        let region = regions
            .iter_mut()
            .find(|r| r.phys_addr == phys_addr)
            .ok_or(TableError::Unknown(phys_addr))?;
        region.active = active;
        Ok(())
    }

    /// Number of registered regions
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// Check if no region is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatsLookup for StatsRegionTable {
    fn translate(&self, phys_addr: u64) -> Option<StatsBuffer> {
        let found = self
            .regions
            .read()
            .iter()
            .find(|r| r.active && r.phys_addr == phys_addr)
            .map(|r| StatsBuffer {
                stat_type: r.stat_type,
                vaddr: r.vaddr,
                fd: r.fd,
            });
        if found.is_none() {
            warn!(phys_addr, "Stats address not mapped");
        }
        found
    }

    fn reverse(&self, vaddr: u64, fd: i32) -> Option<u64> {
        let found = self
            .regions
            .read()
            .iter()
            .find(|r| r.active && r.vaddr == vaddr && r.fd == fd)
            .map(|r| r.phys_addr);
        debug!(vaddr, fd, ?found, "Stats reverse lookup");
        found
    }

    fn active_regions(&self, stat_type: StatType, limit: usize) -> Vec<StatsRegion> {
        self.regions
            .read()
            .iter()
            .filter(|r| r.active && r.stat_type == stat_type)
            .take(limit)
            .copied()
            .collect()
    }
}
