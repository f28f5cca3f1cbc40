//! SessionHandle: capability for one provider session.
//!
//! A handle is a cloneable reference to shared session state, never a raw
//! address. Shutdown flips an atomic flag; every later dispatch fails with
//! [`BridgeError::InvalidHandle`]. Completions already in flight keep their
//! own clone, so the state they point at stays valid until they resolve.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{BridgeConfig, ProviderMode};
use crate::error::BridgeError;
use crate::provider::native::NativeProvider;
use crate::provider::{CloudProvider, DisabledProvider, ProviderCall};
use crate::types::{ContainerId, HandleId};

struct SessionShared {
    id: HandleId,
    container: ContainerId,
    provider: Arc<dyn CloudProvider>,
    live: AtomicBool,
}

/// An initialized session against one container.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Open a session for `container` on `provider`.
    ///
    /// An invalid identifier or a provider refusal is an
    /// [`BridgeError::InitializationError`].
    pub fn init(container: &str, provider: Arc<dyn CloudProvider>) -> Result<Self, BridgeError> {
        let container = ContainerId::parse(container)?;
        provider.open(&container)?;

        let id = HandleId::next();
        tracing::info!(
            "Opened {} for {} on {} provider",
            id,
            container,
            provider.name()
        );
        Ok(Self {
            shared: Arc::new(SessionShared {
                id,
                container,
                provider,
                live: AtomicBool::new(true),
            }),
        })
    }

    /// Open a session on the provider selected by `config`.
    pub fn from_config(container: &str, config: &BridgeConfig) -> Result<Self, BridgeError> {
        let provider: Arc<dyn CloudProvider> = match config.provider.mode {
            ProviderMode::Disabled => Arc::new(DisabledProvider::new(
                config.provider.unavailable_message.clone(),
            )),
            ProviderMode::Native => Arc::new(NativeProvider::linked()?),
        };
        Self::init(container, provider)
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> HandleId {
        self.shared.id
    }

    /// The container this session is scoped to.
    pub fn container(&self) -> &ContainerId {
        &self.shared.container
    }

    /// Whether the session still accepts operations.
    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Name of the provider behind this session.
    pub fn provider_name(&self) -> &str {
        self.shared.provider.name()
    }

    /// Release provider resources. Idempotent.
    ///
    /// Returns `true` only for the call that actually shut the session down.
    pub fn shutdown(&self) -> bool {
        if self
            .shared
            .live
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.shared.provider.close();
        tracing::info!("Shut down {} ({})", self.shared.id, self.shared.container);
        true
    }

    pub(crate) fn submit(&self, call: ProviderCall) {
        self.shared.provider.submit(call);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("container", &self.shared.container)
            .field("provider", &self.shared.provider.name())
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::MockProvider;

    #[test]
    fn init_validates_container() {
        let err = SessionHandle::init("", Arc::new(DisabledProvider::default())).unwrap_err();
        assert!(matches!(err, BridgeError::InitializationError(_)));

        let err = SessionHandle::init("bad container!", Arc::new(DisabledProvider::default()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::InitializationError(_)));
    }

    #[test]
    fn init_reports_provider_refusal() {
        let mock = MockProvider::new();
        mock.fail_next_open(ProviderError::Unavailable("no iCloud account".to_string()));
        let err = SessionHandle::init("test-container", Arc::new(mock)).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InitializationError("provider unavailable: no iCloud account".to_string())
        );
    }

    #[test]
    fn disabled_provider_always_initializes() {
        let handle =
            SessionHandle::init("iCloud.com.example.app", Arc::new(DisabledProvider::default()))
                .unwrap();
        assert!(handle.is_live());
        assert_eq!(handle.container().as_str(), "iCloud.com.example.app");
        assert_eq!(handle.provider_name(), "disabled");
    }

    #[test]
    fn handles_get_distinct_ids() {
        let a = SessionHandle::init("a", Arc::new(DisabledProvider::default())).unwrap();
        let b = SessionHandle::init("b", Arc::new(DisabledProvider::default())).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn shutdown_closes_provider_once() {
        let mock = MockProvider::new();
        let handle = SessionHandle::init("test-container", Arc::new(mock.clone())).unwrap();
        let clone = handle.clone();

        assert!(handle.shutdown());
        assert!(!clone.shutdown());
        assert!(!clone.is_live());
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn drop_does_not_shut_down() {
        let mock = MockProvider::new();
        let handle = SessionHandle::init("test-container", Arc::new(mock.clone())).unwrap();
        drop(handle);
        assert_eq!(mock.close_count(), 0);
    }

    #[test]
    fn from_config_defaults_to_degraded_mode() {
        let handle =
            SessionHandle::from_config("test-container", &BridgeConfig::default()).unwrap();
        assert_eq!(handle.provider_name(), "disabled");
    }

    #[test]
    fn from_config_native_requires_linked_provider() {
        if crate::provider::native::linked().is_some() {
            return;
        }
        let mut config = BridgeConfig::default();
        config.provider.mode = ProviderMode::Native;
        let err = SessionHandle::from_config("test-container", &config).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InitializationError("native provider not linked".to_string())
        );
    }
}
