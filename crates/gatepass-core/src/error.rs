//! Core error types

use gatepass_api::{ErrorCode, GatepassStatus};
use gatepass_store::StoreError;
use gatepass_util::{GatepassId, ParentId};
use thiserror::Error;

/// Errors returned by core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The gatepass is not in a state that allows the attempted operation
    #[error("Gatepass {id} is {from}; cannot apply {attempted}")]
    InvalidStateTransition {
        id: GatepassId,
        from: GatepassStatus,
        attempted: &'static str,
    },

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token already used")]
    TokenAlreadyUsed,

    #[error("Token for gatepass {gatepass} and parent {parent} is used or expired")]
    DuplicateToken {
        gatepass: GatepassId,
        parent: ParentId,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Concurrent writers kept winning until the retry budget ran out
    #[error("Gatepass {0} changed concurrently too many times")]
    Conflict(GatepassId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Protocol error code for IPC replies
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation(_) => ErrorCode::ValidationFailed,
            CoreError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            CoreError::TokenNotFound => ErrorCode::TokenNotFound,
            CoreError::TokenExpired => ErrorCode::TokenExpired,
            CoreError::TokenAlreadyUsed => ErrorCode::TokenAlreadyUsed,
            CoreError::DuplicateToken { .. } => ErrorCode::DuplicateToken,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            CoreError::Conflict(_) => ErrorCode::Conflict,
            CoreError::Store(_) => ErrorCode::InternalError,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(CoreError::TokenExpired.code(), ErrorCode::TokenExpired);
        assert_eq!(
            CoreError::Store(StoreError::Database("locked".into())).code(),
            ErrorCode::InternalError
        );

        let err = CoreError::InvalidStateTransition {
            id: GatepassId::new(),
            from: GatepassStatus::Rejected,
            attempted: "WARDEN_APPROVED",
        };
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert!(err.to_string().contains("REJECTED"));
    }
}
