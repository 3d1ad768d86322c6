//! Shared utilities for gatepassd
//!
//! This crate provides:
//! - ID types (GatepassId, TokenId, StudentId, ParentId, ActorId, ClientId)
//! - Wall-clock helpers with mock time support
//! - Default paths for socket, data, and config

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
