//! CLI command implementations.

pub mod delete;
pub mod fetch;
pub mod save;

use anyhow::{Context, Result};
use cloudkit_bridge::{BridgeConfig, CallerContext, Dispatcher, SaveResult, SessionHandle};

/// One bridge session for the lifetime of a command.
pub struct Session {
    pub handle: SessionHandle,
    pub dispatcher: Dispatcher,
}

impl Session {
    /// Open a session for `container` with the configured provider.
    pub fn open(container: &str, config: &BridgeConfig) -> Result<Self> {
        let handle = SessionHandle::from_config(container, config)
            .with_context(|| format!("Failed to open container {}", container))?;
        let dispatcher = Dispatcher::from_config(CallerContext::new("cli"), config);
        tracing::debug!("Using {} provider", handle.provider_name());
        Ok(Self { handle, dispatcher })
    }

    /// Cancel anything still pending and release the provider.
    pub fn close(&self) {
        self.dispatcher.context().teardown();
        self.handle.shutdown();
    }
}

/// Print an acknowledgement as JSON.
pub fn print_ack(result: &SaveResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
