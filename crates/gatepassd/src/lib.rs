//! gatepassd request handling
//!
//! The binary owns the socket, signals and timers. Turning one protocol
//! request into one response lives here so it can be exercised without a
//! running daemon.

mod dispatch;

pub use dispatch::*;
