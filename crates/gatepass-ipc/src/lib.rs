//! Local socket transport for gatepassd.
//!
//! Requests and events travel as one JSON document per line over a Unix
//! domain socket. The server reports each peer's uid so the dispatcher can
//! decide who may act on behalf of a user.

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("server error: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
