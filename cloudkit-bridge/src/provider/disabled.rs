//! Degraded-mode provider used when CloudKit is not available.
//!
//! Saves and deletes fail with an explanatory message; fetches succeed with
//! empty data. Applications keep working with sync switched off.

use super::{CloudProvider, ProviderCall};
use crate::error::ProviderError;
use crate::types::{ContainerId, ResultShape};

/// Failure message reported for every save/delete in degraded mode.
pub const DEFAULT_UNAVAILABLE_MESSAGE: &str =
    "CloudKit not initialized - requires Apple Developer setup";

/// Provider that answers immediately without touching any cloud service.
#[derive(Debug, Clone)]
pub struct DisabledProvider {
    message: String,
}

impl DisabledProvider {
    /// Degraded mode with a custom failure message.
    ///
    /// An empty message falls back to [`DEFAULT_UNAVAILABLE_MESSAGE`].
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            return Self::default();
        }
        Self { message }
    }

    /// The failure message saves and deletes resolve with.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for DisabledProvider {
    fn default() -> Self {
        Self {
            message: DEFAULT_UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

impl CloudProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn open(&self, container: &ContainerId) -> Result<(), ProviderError> {
        tracing::info!("CloudKit disabled for {}: running in degraded mode", container);
        Ok(())
    }

    fn submit(&self, call: ProviderCall) {
        match call.kind.result_shape() {
            ResultShape::Ack => {
                tracing::warn!("{} skipped: {}", call.kind, self.message);
                call.completion.fail(&self.message)
            }
            ResultShape::Records => call.completion.succeed(Some("[]")),
            ResultShape::OptionalRecord => call.completion.succeed(None),
        };
        tracing::debug!("{} answered by disabled provider", call.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_matches_degraded_contract() {
        let provider = DisabledProvider::default();
        assert_eq!(provider.message(), DEFAULT_UNAVAILABLE_MESSAGE);
        assert_eq!(provider.name(), "disabled");
    }

    #[test]
    fn blank_message_falls_back_to_default() {
        assert_eq!(DisabledProvider::new("   ").message(), DEFAULT_UNAVAILABLE_MESSAGE);
        assert_eq!(DisabledProvider::new("sync off").message(), "sync off");
    }

    #[test]
    fn open_always_succeeds() {
        let container = ContainerId::parse("test-container").unwrap();
        assert!(DisabledProvider::default().open(&container).is_ok());
    }
}
