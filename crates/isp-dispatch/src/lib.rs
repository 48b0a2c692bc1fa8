//! ISP Event Dispatch
//!
//! Turns imaging engine notifications into buffer bookkeeping and consumer
//! notifications:
//! - Ping/pong reservation for streaming start and one-shot capture
//! - Frame delivery with replacement of the retired buffer
//! - Drop policy enforcement and stats address translation
//! - Control commands applied while events are in flight

mod config;
mod control;
mod dispatcher;
mod notify;
mod reservation;
mod session;

pub use config::SessionConfig;
pub use control::{ControlCommand, CropStore};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use notify::{Notification, NotificationKind, NotificationSender, Payload};
pub use reservation::{Reservation, ReservationManager};
pub use session::{Backends, IspSession};
