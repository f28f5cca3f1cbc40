//! Error types for cloudkit-bridge.
//!
//! Everything the caller can observe flattens to a human-readable string.
//! Bindings get string messages, not Rust enum internals.

use thiserror::Error;

use crate::types::HandleId;

/// Errors surfaced by the bridge.
///
/// `InitializationError`, `InvalidHandle` and `InvalidArgument` are raised
/// synchronously, before any provider work starts. `ProviderFailure` and
/// `Cancelled` only ever arrive through a completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The provider is unavailable or misconfigured for this container.
    #[error("initialization failed: {0}")]
    InitializationError(String),

    /// Operation against a handle that has been shut down.
    #[error("invalid handle: {0} has been shut down")]
    InvalidHandle(HandleId),

    /// Malformed request, rejected before dispatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Asynchronous failure reported by the provider.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// The caller's execution context went away before completion.
    #[error("cancelled: caller context torn down")]
    Cancelled,
}

impl BridgeError {
    /// Whether this error is raised synchronously by the dispatcher.
    pub fn is_sync(&self) -> bool {
        matches!(
            self,
            BridgeError::InitializationError(_)
                | BridgeError::InvalidHandle(_)
                | BridgeError::InvalidArgument(_)
        )
    }

    /// The bare cause, without the variant prefix.
    ///
    /// Used where the caller gets a `{ success: false, error }` pair and the
    /// provider's own wording should come through untouched.
    pub fn message(&self) -> String {
        match self {
            BridgeError::InitializationError(msg)
            | BridgeError::InvalidArgument(msg)
            | BridgeError::ProviderFailure(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors a provider reports when opening a container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider cannot be reached in this environment.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Missing credentials, entitlements or container setup.
    #[error("provider misconfigured: {0}")]
    Misconfigured(String),
}

impl From<ProviderError> for BridgeError {
    fn from(err: ProviderError) -> Self {
        BridgeError::InitializationError(err.to_string())
    }
}
