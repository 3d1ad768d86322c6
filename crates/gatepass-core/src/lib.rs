//! Core approval engine for gatepassd
//!
//! This crate is the heart of gatepassd, containing:
//! - Approval state machine (PendingParent -> PendingWarden -> Approved, or Rejected/Expired)
//! - Single-use, time-limited approval tokens
//! - Expiry sweeper (periodic and lazy on every transition)
//! - Notification dispatcher contract for guardian approval links

mod engine;
mod error;
mod events;
mod notify;
mod sweeper;
mod tokens;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use notify::*;
pub use tokens::*;
