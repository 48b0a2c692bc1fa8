//! Session control commands

use isp_protocol::{IspError, OutputTopology, StatType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Runtime reconfiguration issued by the camera stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Arm or disarm the drop policy
    EnableDropFrame(bool),
    /// Frames to drop before delivery resumes
    SetDropFrameNum(i32),
    /// Return a consumed stats buffer to the engine
    ReleaseStatsBuffer {
        stat_type: StatType,
        vaddr: u64,
        fd: i32,
    },
    /// Start collecting one statistic into its registered regions
    EnableStats(StatType),
    /// Stop collecting one statistic
    DisableStats(StatType),
    /// Crop window parameters for the post-processing stage
    SetCrop(Vec<u8>),
    /// Switch the output topology
    SetOutputTopology(OutputTopology),
}

impl ControlCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::EnableDropFrame(_) => "enable_drop_frame",
            ControlCommand::SetDropFrameNum(_) => "set_drop_frame_num",
            ControlCommand::ReleaseStatsBuffer { .. } => "release_stats_buffer",
            ControlCommand::EnableStats(_) => "enable_stats",
            ControlCommand::DisableStats(_) => "disable_stats",
            ControlCommand::SetCrop(_) => "set_crop",
            ControlCommand::SetOutputTopology(_) => "set_output_topology",
        }
    }
}

/// Crop parameters of the session
///
/// The first write fixes the capacity; later writes may shrink the data but
/// never grow past it.
#[derive(Debug, Default)]
pub struct CropStore {
    data: Mutex<Option<CropData>>,
}

#[derive(Debug)]
struct CropData {
    /// Length of the first write
    capacity: usize,
    bytes: Vec<u8>,
}

impl CropStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored crop parameters
    pub fn set(&self, data: &[u8]) -> Result<(), IspError> {
        if data.is_empty() {
            return Err(IspError::InvalidArgument("empty crop data"));
        }

        let mut stored = self.data.lock();
        match stored.as_mut() {
            None => {
                *stored = Some(CropData {
                    capacity: data.len(),
                    bytes: data.to_vec(),
                })
            }
            Some(current) if data.len() > current.capacity => {
                error!(
                    len = data.len(),
                    capacity = current.capacity,
                    "Crop data larger than first allocation"
                );
                return Err(IspError::InvalidArgument("crop data grew"));
            }
            Some(current) => {
                current.bytes.clear();
                current.bytes.extend_from_slice(data);
            }
        }
        debug!(len = data.len(), "Stored crop data");
        Ok(())
    }

    /// Copy of the current crop parameters
    pub fn get(&self) -> Option<Vec<u8>> {
        self.data.lock().as_ref().map(|c| c.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_first_set_allocates() {
        let crop = CropStore::new();
        assert!(crop.get().is_none());

        crop.set(&[1, 2, 3, 4]).unwrap();
        assert_eq!(crop.get(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_crop_shrink_then_regrow_within_capacity() {
        let crop = CropStore::new();
        crop.set(&[1, 2, 3, 4]).unwrap();
        crop.set(&[9]).unwrap();
        assert_eq!(crop.get(), Some(vec![9]));

        crop.set(&[5, 6, 7, 8]).unwrap();
        assert_eq!(crop.get(), Some(vec![5, 6, 7, 8]));
    }

    #[test]
    fn test_crop_growth_rejected() {
        let crop = CropStore::new();
        crop.set(&[0; 8]).unwrap();

        let err = crop.set(&[0; 9]).unwrap_err();
        assert!(matches!(err, IspError::InvalidArgument(_)));
        assert_eq!(crop.get(), Some(vec![0; 8]));
    }

    #[test]
    fn test_crop_empty_rejected() {
        let crop = CropStore::new();
        assert!(crop.set(&[]).is_err());
    }

    #[test]
    fn test_command_names() {
        let cmd = ControlCommand::ReleaseStatsBuffer {
            stat_type: StatType::Awb,
            vaddr: 0x10,
            fd: 4,
        };
        assert_eq!(cmd.name(), "release_stats_buffer");
        assert_eq!(
            ControlCommand::SetOutputTopology(OutputTopology::Raw).name(),
            "set_output_topology"
        );
    }
}
