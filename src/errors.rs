//! Typed error hierarchy for skyforge.
//!
//! - `ValidationError`: synchronous request validation (HTTP 4xx)
//! - `CloudError`: failures reported by a `CloudProvider` call
//! - `ProvisionError`: everything that can end an orchestrator run

use thiserror::Error;

/// Machine-readable validation error kinds returned to HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    MissingParameter,
    InvalidDomain,
    SubdomainNotAllowed,
    UnsupportedSize,
    InvalidParameter,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::MissingParameter => "missing_parameter",
            ValidationKind::InvalidDomain => "invalid_domain",
            ValidationKind::SubdomainNotAllowed => "subdomain_not_allowed",
            ValidationKind::UnsupportedSize => "unsupported_size",
            ValidationKind::InvalidParameter => "invalid_parameter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn missing(field: &str) -> Self {
        Self {
            kind: ValidationKind::MissingParameter,
            message: format!("Missing '{}' parameter", field),
        }
    }

    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors from the cloud control-plane seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Throttling, timeouts, 5xx: worth retrying.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The provider refused the request; retrying will not help.
    #[error("Request rejected by provider: {0}")]
    Rejected(String),

    #[error("Provider authentication failed: {0}")]
    Unauthorized(String),
}

impl CloudError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }
}

/// Errors that end an orchestrator run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{message}")]
    ResourceCreation { step: String, message: String },

    #[error("Incorrect NS delegation for DNS zone {zone}: {message}")]
    Delegation { zone: String, message: String },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Cleanup of {resource} failed: {message}")]
    Cleanup { resource: String, message: String },

    #[error("Timed out after {seconds}s while {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn resource(step: impl Into<String>, message: impl Into<String>) -> Self {
        ProvisionError::ResourceCreation {
            step: step.into(),
            message: message.into(),
        }
    }
}
