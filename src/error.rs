//! Error types for the FCD CSI controller
//!
//! Provides structured error types for the controller surface, the
//! collaborator drivers, configuration loading and the API layer.

use std::fmt;
use thiserror::Error;

// =============================================================================
// Status Codes
// =============================================================================

/// Coarse classification surfaced to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    InvalidArgument,
    AlreadyExists,
    NotFound,
    Internal,
    Unimplemented,
    Cancelled,
    DeadlineExceeded,
    Unavailable,
    Unknown,
}

impl Code {
    /// Wire name, matching the CSI/gRPC status code spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::NotFound => "NOT_FOUND",
            Code::Internal => "INTERNAL",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Cancelled => "CANCELLED",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Unknown => "UNKNOWN",
        }
    }

    /// HTTP status used by the API surface
    pub fn http_status(&self) -> u16 {
        match self {
            Code::InvalidArgument => 400,
            Code::AlreadyExists => 409,
            Code::NotFound => 404,
            Code::Internal | Code::Unknown => 500,
            Code::Unimplemented => 501,
            Code::Cancelled => 499,
            Code::DeadlineExceeded => 504,
            Code::Unavailable => 503,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Driver Errors
// =============================================================================

/// Failures reported by the connection manager and datacenter drivers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{operation} failed: {reason}")]
    Api { operation: String, reason: String },

    #[error("connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },

    #[error("no datacenter matches zone={zone} region={region}")]
    NoZoneMatch { zone: String, region: String },
}

impl DriverError {
    pub fn api(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::Api {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> Code {
        match self {
            DriverError::NotFound { .. } | DriverError::NoZoneMatch { .. } => Code::NotFound,
            DriverError::Connection { .. } => Code::Unavailable,
            DriverError::Api { .. } => Code::Unknown,
        }
    }
}

// =============================================================================
// Controller Errors
// =============================================================================

/// Unified error type for the controller
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    NotFound(String),

    #[error("no first class disk found with id {volume_id}")]
    DiskIdNotFound { volume_id: String },

    #[error("{0} is not implemented")]
    Unimplemented(String),

    // =========================================================================
    // Request Context Errors
    // =========================================================================
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded { operation: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("{0}")]
    Internal(String),

    /// Collaborator failure carried through without re-wrapping
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("contract violation: {0}")]
    ContractViolation(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classification reported to the caller
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument(_) => Code::InvalidArgument,
            Error::AlreadyExists(_) => Code::AlreadyExists,
            Error::NotFound(_) | Error::DiskIdNotFound { .. } => Code::NotFound,
            Error::Unimplemented(_) => Code::Unimplemented,
            Error::Cancelled { .. } => Code::Cancelled,
            Error::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            Error::Driver(e) => e.code(),
            Error::Internal(_)
            | Error::ContractViolation(_)
            | Error::Configuration(_)
            | Error::YamlParse(_)
            | Error::JsonParse(_)
            | Error::Metrics(_)
            | Error::Io(_) => Code::Internal,
        }
    }

    /// Whether the request context aborted the operation
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::DeadlineExceeded { .. })
    }
}

/// Result type alias for the controller
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidArgument("Volume name is a required parameter.".into()).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            Error::DiskIdNotFound {
                volume_id: "fcd-1".into()
            }
            .code(),
            Code::NotFound
        );
        assert_eq!(
            Error::ContractViolation("backing".into()).code(),
            Code::Internal
        );
        assert_eq!(
            Error::Unimplemented("CreateSnapshot".into()).code(),
            Code::Unimplemented
        );
    }

    #[test]
    fn test_driver_error_passthrough() {
        let err: Error = DriverError::Connection {
            server: "vc1".into(),
            reason: "refused".into(),
        }
        .into();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(err.to_string(), "connection to vc1 failed: refused");

        let err: Error = DriverError::api("AttachDisk", "device busy").into();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Code::InvalidArgument.http_status(), 400);
        assert_eq!(Code::AlreadyExists.http_status(), 409);
        assert_eq!(Code::Unimplemented.http_status(), 501);
        assert!(Error::DeadlineExceeded {
            operation: "CreateVolume".into()
        }
        .is_aborted());
    }
}
