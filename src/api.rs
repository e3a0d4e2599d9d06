//! Result values handed to the caller of [`ServerPanel`](crate::ServerPanel).
//!
//! Errors never cross this boundary: every fallible operation yields an
//! [`ApiResult`] carrying a success flag, a human-readable message and, on
//! failure, the [`ErrorKind`] of what went wrong.

use crate::error::{ErrorKind, Result};
use crate::server::ServerState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of whoever invoked an operation, recorded in audit logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller(String);

impl Caller {
    /// Create a caller identity
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity used for operations triggered by the host itself.
    pub fn system() -> Self {
        Self("system".to_string())
    }

    /// The identity as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResult<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Message suitable for display
    pub message: String,
    /// Payload of a successful operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Classification of a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl<T> ApiResult<T> {
    /// A successful result.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    /// A failed result.
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(kind),
        }
    }

    /// Whether the operation succeeded
    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl<T> From<Result<(T, String)>> for ApiResult<T> {
    fn from(result: Result<(T, String)>) -> Self {
        match result {
            Ok((data, message)) => Self::ok(message, data),
            Err(e) => Self::failed(e.kind(), e.to_string()),
        }
    }
}

/// Overview of the server installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Supervisor state
    pub status: ServerState,
    /// Whether a server binary has been uploaded
    pub has_binary: bool,
    /// World directories, sorted by name
    pub worlds: Vec<String>,
    /// World the server loads on next start
    pub active_world: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_error_becomes_failed_result() {
        let result: ApiResult<()> = ApiResult::from(Err(Error::NotRunning));
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::NotRunning));
        assert_eq!(result.message, "Server is not running");
    }

    #[test]
    fn test_serialized_shape() {
        let result = ApiResult::ok("Server started", ());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Server started");
        assert!(json.get("error").is_none());

        let status = StatusReport {
            status: ServerState::Running,
            has_binary: true,
            worlds: vec!["world".to_string()],
            active_world: "world".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["hasBinary"], true);
        assert_eq!(json["activeWorld"], "world");
    }
}
