//! Provider abstraction for cloudkit-bridge.
//!
//! The provider is the external CloudKit client. The bridge treats it as
//! opaque: it receives one [`ProviderCall`] per dispatched request and
//! answers through the call's [`CompletionSender`], from whatever thread
//! it likes, whenever it likes.
//!
//! # Implementations
//!
//! - [`DisabledProvider`]: degraded mode, no CloudKit available
//! - [`MockProvider`]: scripted provider for tests
//! - [`Spawned`]: adapts an [`AsyncCloudProvider`] onto a tokio runtime
//! - [`native::NativeProvider`]: a provider linked in through a C vtable

mod disabled;
mod mock;
pub mod native;

pub use disabled::{DisabledProvider, DEFAULT_UNAVAILABLE_MESSAGE};
pub use mock::{CallbackMode, MockProvider, MockResponse, RecordedCall};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BridgeError, ProviderError};
use crate::relay::{CompletionSender, OperationResult};
use crate::types::{ContainerId, HandleId, OperationKind};

/// Message used when a provider fails without saying why.
pub const UNKNOWN_PROVIDER_ERROR: &str = "unknown provider error";

/// One request handed to the provider.
///
/// Everything is owned; nothing points back into caller memory.
#[derive(Debug)]
pub struct ProviderCall {
    /// Session the request was dispatched against.
    pub handle: HandleId,
    /// Container the session is scoped to.
    pub container: ContainerId,
    /// Which operation.
    pub kind: OperationKind,
    /// Serialized record or identifier (validated by the dispatcher).
    pub payload: Option<String>,
    /// Where the outcome goes.
    pub completion: CompletionSender,
}

/// Outcome reported by a provider, borrowing the provider's buffers.
///
/// The relay copies the strings before returning from
/// [`CompletionSender::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome<'a> {
    /// Success, with a serialized payload for fetches.
    Success(Option<&'a str>),
    /// Failure with a human-readable message.
    Failure(&'a str),
}

impl ProviderOutcome<'_> {
    /// Copy into an owned [`OperationResult`].
    ///
    /// An empty failure message becomes [`UNKNOWN_PROVIDER_ERROR`].
    pub fn into_result(self) -> OperationResult {
        match self {
            ProviderOutcome::Success(payload) => Ok(payload.map(str::to_owned)),
            ProviderOutcome::Failure(message) if message.trim().is_empty() => Err(
                BridgeError::ProviderFailure(UNKNOWN_PROVIDER_ERROR.to_string()),
            ),
            ProviderOutcome::Failure(message) => {
                Err(BridgeError::ProviderFailure(message.to_string()))
            }
        }
    }
}

/// A cloud synchronization provider.
///
/// `submit` must not block: start the work and return. The completion may
/// be resolved before `submit` returns, later from another thread, or (for
/// a misbehaving provider) more than once; the relay copes with all three.
pub trait CloudProvider: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Prepare a session for `container`.
    ///
    /// Refusal surfaces to the caller as
    /// [`BridgeError::InitializationError`].
    fn open(&self, container: &ContainerId) -> Result<(), ProviderError>;

    /// Start one operation.
    fn submit(&self, call: ProviderCall);

    /// Release provider resources. Called at most once per session.
    fn close(&self) {}
}

/// A provider written as async functions.
///
/// Wrap it in [`Spawned`] to plug it into a session.
#[async_trait]
pub trait AsyncCloudProvider: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Prepare a session for `container`.
    fn open(&self, _container: &ContainerId) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Run one operation to completion.
    ///
    /// `Ok(None)` is success without payload; `Err` carries the message.
    async fn execute(
        &self,
        container: &ContainerId,
        kind: OperationKind,
        payload: Option<String>,
    ) -> Result<Option<String>, String>;
}

/// Runs an [`AsyncCloudProvider`] on a tokio runtime, one task per call.
pub struct Spawned<P> {
    inner: Arc<P>,
    runtime: tokio::runtime::Handle,
}

impl<P: AsyncCloudProvider> Spawned<P> {
    /// Spawn calls onto `runtime`.
    pub fn new(provider: P, runtime: tokio::runtime::Handle) -> Self {
        Self {
            inner: Arc::new(provider),
            runtime,
        }
    }

    /// Spawn calls onto the runtime this is called from.
    ///
    /// Panics outside a tokio runtime, like [`tokio::runtime::Handle::current`].
    pub fn on_current(provider: P) -> Self {
        Self::new(provider, tokio::runtime::Handle::current())
    }
}

impl<P: AsyncCloudProvider> CloudProvider for Spawned<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn open(&self, container: &ContainerId) -> Result<(), ProviderError> {
        self.inner.open(container)
    }

    fn submit(&self, call: ProviderCall) {
        let provider = Arc::clone(&self.inner);
        self.runtime.spawn(async move {
            let ProviderCall {
                container,
                kind,
                payload,
                completion,
                ..
            } = call;
            match provider.execute(&container, kind, payload).await {
                Ok(payload) => completion.succeed(payload.as_deref()),
                Err(message) => completion.fail(&message),
            };
        });
    }
}
