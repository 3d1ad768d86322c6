//! Persistence layer for gatepassd
//!
//! Provides:
//! - Gatepass records with optimistic versioning
//! - Per-gatepass audit trail (append-only)
//! - Single-use approval tokens with compare-and-swap redemption
//! - Student/guardian registry

mod audit;
mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The record changed since it was read
    #[error("Version conflict on {0}")]
    VersionConflict(String),

    /// The token was redeemed by a concurrent caller
    #[error("Token already used: {0}")]
    TokenAlreadyUsed(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(e: chrono::ParseError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<gatepass_api::ParseEnumError> for StoreError {
    fn from(e: gatepass_api::ParseEnumError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<uuid::Error> for StoreError {
    fn from(e: uuid::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
