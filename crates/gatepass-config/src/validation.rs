//! Configuration validation

use crate::schema::{RawConfig, RawNotifications, RawWorkflow};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("workflow.{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("workflow.max_transition_retries must be at least 1")]
    NoRetries,

    #[error("notifications.approval_base_url '{0}' must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(validate_workflow(&config.workflow));
    errors.extend(validate_notifications(&config.notifications));

    if let Some(dir) = &config.daemon.data_dir
        && dir.as_os_str().is_empty()
    {
        errors.push(ValidationError::GlobalError(
            "daemon.data_dir cannot be empty".into(),
        ));
    }

    errors
}

fn validate_workflow(workflow: &RawWorkflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let durations = [
        ("pending_window_seconds", workflow.pending_window_seconds),
        ("warden_window_seconds", workflow.warden_window_seconds),
        ("max_duration_seconds", workflow.max_duration_seconds),
        ("sweep_interval_seconds", workflow.sweep_interval_seconds),
    ];

    for (field, value) in durations {
        if value == Some(0) {
            errors.push(ValidationError::ZeroDuration { field });
        }
    }

    if workflow.max_transition_retries == Some(0) {
        errors.push(ValidationError::NoRetries);
    }

    errors
}

fn validate_notifications(notifications: &RawNotifications) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(url) = &notifications.approval_base_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidBaseUrl(url.clone()));
    }

    errors
}
