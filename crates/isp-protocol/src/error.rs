//! ISP Error Types

use thiserror::Error;

use crate::event::OutputId;
use crate::topology::{LogicalCaptureMode, OutputTopology};

/// Errors that can occur while dispatching imaging engine events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IspError {
    /// No logical capture mode for this output in the active topology
    #[error("No capture mode for {output:?} output in {topology:?} topology")]
    UnresolvedMode {
        output: OutputId,
        topology: OutputTopology,
    },

    /// Buffer pool has no free buffer for the requested mode
    #[error("Buffer pool exhausted for {0:?} mode")]
    PoolExhausted(LogicalCaptureMode),

    /// Stats address has no registered region
    #[error("No stats region mapped at {0:#x}")]
    TranslationNotFound(u64),

    /// Hardware configuration callback rejected a command
    #[error("Hardware rejected {command} (code {code})")]
    HardwareConfigureFailed { command: &'static str, code: i32 },

    /// Raw event could not be classified
    #[error("Invalid {field} in engine event: {value}")]
    InvalidEventKind { field: &'static str, value: u32 },

    /// Control command argument rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Buffer returned to the pool by a stage that does not own it
    #[error("Buffer {index} is not owned by the releasing stage")]
    NotOwned { index: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failure() {
        let e = IspError::UnresolvedMode {
            output: OutputId::Secondary,
            topology: OutputTopology::Raw,
        };
        assert_eq!(e.to_string(), "No capture mode for Secondary output in Raw topology");
        assert_eq!(
            IspError::TranslationNotFound(0x9000).to_string(),
            "No stats region mapped at 0x9000"
        );
    }
}
