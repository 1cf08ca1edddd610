//! Error types for the offline agent.

use thiserror::Error;

use crate::lifecycle::{LifecycleInput, LifecycleState};

/// Result type alias for agent operations.
pub type SwResult<T> = Result<T, ServiceWorkerError>;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceWorkerError {
    /// An asset of the shell could not be fetched or stored. The generation is never promoted.
    #[error("Install of {generation} failed: {reason}")]
    InstallFailed { generation: String, reason: String },

    /// A stale generation could not be deleted during activation.
    #[error("Cleanup of {generation} failed: {reason}")]
    CleanupFailed { generation: String, reason: String },

    /// The network call threw (no connectivity, DNS, reset, timeout).
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A response arrived but was not a 2xx where one was required.
    #[error("{url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    /// Neither cache, network nor the offline page produced a response.
    #[error("Offline fallback {0} is not cached")]
    FallbackMissing(String),

    /// The external deferred replay reported failure.
    #[error("Deferred replay failed: {0}")]
    RelayFailure(String),

    /// A push payload was present but not decodable.
    #[error("Push payload decode failed: {0}")]
    PushDecode(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cannot apply {input} while {state}")]
    InvalidTransition {
        state: LifecycleState,
        input: LifecycleInput,
    },

    #[error("Config error: {0}")]
    Config(String),

    /// The notification or client platform rejected a request.
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ServiceWorkerError {
    /// Create a network unavailable error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkUnavailable(msg.into())
    }

    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a platform error.
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Whether the error came out of the network layer, as opposed to a
    /// well-formed but unwanted response.
    pub fn is_thrown_by_network(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// Short category name, used as a structured log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstallFailed { .. } => "install",
            Self::CleanupFailed { .. } => "cleanup",
            Self::NetworkUnavailable(_) => "network",
            Self::UnexpectedStatus { .. } => "status",
            Self::FallbackMissing(_) => "fallback_missing",
            Self::RelayFailure(_) => "relay",
            Self::PushDecode(_) => "push_decode",
            Self::Cache(_) => "cache",
            Self::InvalidTransition { .. } => "state",
            Self::Config(_) => "config",
            Self::Platform(_) => "platform",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid URL: {err}"))
    }
}

impl From<serde_json::Error> for ServiceWorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
