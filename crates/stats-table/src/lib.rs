//! Statistics Buffer Translation
//!
//! The engine reports statistics buffers by device address; the consumer
//! knows them by mapping offset and file descriptor. This crate keeps the
//! registered regions and translates in both directions.

mod table;

pub use table::{StatsRegionTable, TableError, MAX_STATS_REGIONS};
