//! Error types for lockwarden

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Core error type for lockwarden operations.
///
/// Only `Configuration` is fatal. Every other variant is captured per item
/// into a run report and the run continues.
#[derive(Debug, Clone, Error)]
pub enum GovernanceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unparseable scope '{scope}': {reason}")]
    ScopeParse { scope: String, reason: String },

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed event: {0}")]
    Parse(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GovernanceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn scope(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ScopeParse {
            scope: scope.into(),
            reason: reason.into(),
        }
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteCall(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Serializable classification used in run reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::ScopeParse { .. } => ErrorKind::ScopeParse,
            Self::RemoteCall(_) => ErrorKind::RemoteCall,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Probe(_) => ErrorKind::Probe,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error must abort startup instead of being recorded
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Error classification as it appears in a run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ScopeParse,
    RemoteCall,
    Timeout,
    Parse,
    Probe,
    Cancelled,
    Internal,
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_is_fatal() {
        assert!(GovernanceError::config("bad day").is_fatal());
        assert!(!GovernanceError::remote("503").is_fatal());
        assert!(!GovernanceError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!GovernanceError::scope("/x", "too short").is_fatal());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&GovernanceError::scope("/x", "y").kind()).unwrap();
        assert_eq!(json, "\"scope_parse\"");
    }
}
