//! Frame Drop Policy
//!
//! Decides which completed frames are discarded before they reach the
//! consumer. A primary frame carries the decision; its secondary sibling
//! (thumbnail or preview of the same exposure) follows it.

mod policy;

pub use policy::{DropDecision, DropPolicy, DropSnapshot};
