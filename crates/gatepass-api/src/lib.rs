//! Domain read models and protocol types for gatepassd
//!
//! This crate defines the stable API between gatepassd and its collaborators:
//! - Gatepass, token, student and parent read models
//! - Commands (requests from clients) and responses
//! - Events (service -> subscribed clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
