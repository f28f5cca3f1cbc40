//! # cloudkit-node
//!
//! Node.js/Electron native addon for CloudKit sync via napi-rs.
//!
//! Wraps a [`cloudkit_bridge::SessionHandle`] into the `CloudKitManager`
//! JavaScript class. Argument errors throw synchronously; everything else
//! returns a Promise settled by the bridge's completion relay.

#![warn(clippy::all)]

use napi::bindgen_prelude::*;
use napi::{CleanupEnvHook, JsObject};
use napi_derive::napi;
use serde_json::Value;

use cloudkit_bridge::{
    BridgeConfig, BridgeError, CallerContext, ConfigError, Dispatcher, ProviderMode, SaveResult,
    SessionHandle,
};

// ============================================================
// FFI types: #[napi(object)] maps to plain JS objects
// ============================================================

/// Options for `new CloudKitManager(containerIdentifier, options)`.
#[napi(object)]
#[derive(Default)]
pub struct JsManagerOptions {
    /// `"disabled"` (default) or `"native"`.
    pub provider: Option<String>,
    /// Failure message for saves and deletes when CloudKit is unavailable.
    pub unavailable_message: Option<String>,
    /// Reject requests the provider has not answered within this many ms.
    pub completion_timeout_ms: Option<u32>,
}

/// Result of a save or delete.
#[napi(object)]
pub struct JsSaveResult {
    /// Whether the change was accepted.
    pub success: bool,
    /// Why it was not.
    pub error: Option<String>,
}

// ============================================================
// Internal conversion helpers (testable without napi env)
// ============================================================

fn options_to_config(
    options: Option<&JsManagerOptions>,
) -> std::result::Result<BridgeConfig, ConfigError> {
    let mut config = BridgeConfig::default();
    let Some(options) = options else {
        return Ok(config);
    };
    if let Some(mode) = &options.provider {
        config.provider.mode = mode.parse::<ProviderMode>()?;
    }
    if let Some(message) = &options.unavailable_message {
        config.provider.unavailable_message = message.clone();
    }
    if let Some(ms) = options.completion_timeout_ms {
        config.relay.completion_timeout_ms = u64::from(ms);
    }
    config.validate()?;
    Ok(config)
}

/// Serialize a JS object argument, or explain what was expected.
fn record_arg(value: Option<&Value>, what: &str) -> std::result::Result<String, String> {
    match value {
        Some(value @ Value::Object(_)) => Ok(value.to_string()),
        _ => Err(format!("{} object required", what)),
    }
}

fn id_arg(id: Option<String>) -> std::result::Result<String, String> {
    id.ok_or_else(|| "Item ID required".to_string())
}

fn parse_records(records: Vec<String>) -> std::result::Result<Vec<Value>, BridgeError> {
    records
        .iter()
        .map(|record| {
            serde_json::from_str(record)
                .map_err(|e| BridgeError::ProviderFailure(format!("malformed record: {}", e)))
        })
        .collect()
}

fn parse_record(record: Option<String>) -> std::result::Result<Option<Value>, BridgeError> {
    record
        .map(|text| {
            serde_json::from_str(&text)
                .map_err(|e| BridgeError::ProviderFailure(format!("malformed record: {}", e)))
        })
        .transpose()
}

fn save_result_to_js(result: SaveResult) -> JsSaveResult {
    JsSaveResult {
        success: result.success,
        error: result.error,
    }
}

/// Shut the session down and hand back the cleanup hook to unregister.
///
/// The hook comes back at most once, however often this runs.
fn release_session<H>(handle: &SessionHandle, cleanup: &mut Option<H>) -> (bool, Option<H>) {
    (handle.shutdown(), cleanup.take())
}

fn to_napi_error(err: BridgeError) -> Error {
    match err {
        BridgeError::InvalidArgument(msg) => Error::new(Status::InvalidArg, msg),
        other => Error::from_reason(other.to_string()),
    }
}

fn type_error(msg: String) -> Error {
    Error::new(Status::InvalidArg, msg)
}

#[cfg(feature = "native-provider")]
fn link_native_provider() {
    use cloudkit_bridge::provider::native::{self, CloudKitProviderVTable};

    #[allow(non_upper_case_globals)]
    extern "C" {
        static cloudkit_provider_vtable: CloudKitProviderVTable;
    }

    // SAFETY: the linked library exports an immutable, fully initialized table.
    let vtable = unsafe { &*std::ptr::addr_of!(cloudkit_provider_vtable) };
    native::register(vtable);
}

#[cfg(not(feature = "native-provider"))]
fn link_native_provider() {}

// ============================================================
// CloudKitManager, the main napi class
// ============================================================

/// CloudKit sync for settings, history items and notes.
///
/// Without an Apple Developer setup the manager runs in degraded mode:
/// saves resolve `{ success: false, error }`, fetches resolve empty.
#[napi]
pub struct CloudKitManager {
    handle: SessionHandle,
    dispatcher: Dispatcher,
    /// Removed by `shutdown` so closed managers don't pile up until exit.
    cleanup: Option<CleanupEnvHook<(CallerContext, SessionHandle)>>,
}

#[napi]
impl CloudKitManager {
    /// Open a session for a CloudKit container.
    ///
    /// Throws if the identifier is invalid or the provider refuses it.
    #[napi(constructor)]
    pub fn new(
        env: Env,
        container_identifier: String,
        options: Option<JsManagerOptions>,
    ) -> Result<Self> {
        let config = options_to_config(options.as_ref())
            .map_err(|e| type_error(e.to_string()))?;
        if config.provider.mode == ProviderMode::Native {
            link_native_provider();
        }

        let handle =
            SessionHandle::from_config(&container_identifier, &config).map_err(to_napi_error)?;
        let context = CallerContext::new(format!("node:{}", handle.id()));
        let dispatcher = Dispatcher::from_config(context.clone(), &config);

        // Completions still pending when the JS environment exits are
        // cancelled; provider callbacks after that are discarded.
        let mut env = env;
        let session = handle.clone();
        let cleanup = env.add_env_cleanup_hook((context, session), |(context, session)| {
            context.teardown();
            session.shutdown();
        })?;

        Ok(Self {
            handle,
            dispatcher,
            cleanup: Some(cleanup),
        })
    }

    /// Store the settings object.
    #[napi(ts_args_type = "settings: object", ts_return_type = "Promise<JsSaveResult>")]
    pub fn save_settings(&self, env: Env, settings: Option<Value>) -> Result<JsObject> {
        let record = record_arg(settings.as_ref(), "Settings").map_err(type_error)?;
        let pending = self
            .dispatcher
            .save_settings(&self.handle, record)
            .map_err(to_napi_error)?;
        env.spawn_future(async move { Ok(save_result_to_js(pending.await)) })
    }

    /// Fetch the settings object, or `null` if none was saved.
    #[napi(ts_return_type = "Promise<object | null>")]
    pub fn fetch_settings(&self, env: Env) -> Result<JsObject> {
        let pending = self
            .dispatcher
            .fetch_settings(&self.handle)
            .map_err(to_napi_error)?;
        env.spawn_future(async move {
            let record = pending.await.map_err(to_napi_error)?;
            parse_record(record).map_err(to_napi_error)
        })
    }

    /// Store one history item.
    #[napi(ts_args_type = "item: object", ts_return_type = "Promise<JsSaveResult>")]
    pub fn save_history_item(&self, env: Env, item: Option<Value>) -> Result<JsObject> {
        let record = record_arg(item.as_ref(), "History item").map_err(type_error)?;
        let pending = self
            .dispatcher
            .save_history_item(&self.handle, record)
            .map_err(to_napi_error)?;
        env.spawn_future(async move { Ok(save_result_to_js(pending.await)) })
    }

    /// Fetch every history item.
    #[napi(ts_return_type = "Promise<object[]>")]
    pub fn fetch_all_history(&self, env: Env) -> Result<JsObject> {
        let pending = self
            .dispatcher
            .fetch_all_history(&self.handle)
            .map_err(to_napi_error)?;
        env.spawn_future(async move {
            let records = pending.await.map_err(to_napi_error)?;
            parse_records(records).map_err(to_napi_error)
        })
    }

    /// Delete one history item by id.
    #[napi(ts_args_type = "id: string", ts_return_type = "Promise<JsSaveResult>")]
    pub fn delete_history_item(&self, env: Env, id: Option<String>) -> Result<JsObject> {
        let id = id_arg(id).map_err(type_error)?;
        let pending = self
            .dispatcher
            .delete_history_item(&self.handle, id)
            .map_err(to_napi_error)?;
        env.spawn_future(async move { Ok(save_result_to_js(pending.await)) })
    }

    /// Store one note.
    #[napi(ts_args_type = "note: object", ts_return_type = "Promise<JsSaveResult>")]
    pub fn save_note(&self, env: Env, note: Option<Value>) -> Result<JsObject> {
        let record = record_arg(note.as_ref(), "Note").map_err(type_error)?;
        let pending = self
            .dispatcher
            .save_note(&self.handle, record)
            .map_err(to_napi_error)?;
        env.spawn_future(async move { Ok(save_result_to_js(pending.await)) })
    }

    /// Fetch every note.
    #[napi(ts_return_type = "Promise<object[]>")]
    pub fn fetch_all_notes(&self, env: Env) -> Result<JsObject> {
        let pending = self
            .dispatcher
            .fetch_all_notes(&self.handle)
            .map_err(to_napi_error)?;
        env.spawn_future(async move {
            let records = pending.await.map_err(to_napi_error)?;
            parse_records(records).map_err(to_napi_error)
        })
    }

    /// Delete one note by id.
    #[napi(ts_args_type = "id: string", ts_return_type = "Promise<JsSaveResult>")]
    pub fn delete_note(&self, env: Env, id: Option<String>) -> Result<JsObject> {
        let id = id_arg(id).map_err(type_error)?;
        let pending = self
            .dispatcher
            .delete_note(&self.handle, id)
            .map_err(to_napi_error)?;
        env.spawn_future(async move { Ok(save_result_to_js(pending.await)) })
    }

    /// Release the session. Later calls throw; returns false if already done.
    #[napi]
    pub fn shutdown(&mut self, env: Env) -> Result<bool> {
        let (released, hook) = release_session(&self.handle, &mut self.cleanup);
        if let Some(hook) = hook {
            let mut env = env;
            env.remove_env_cleanup_hook(hook)?;
        }
        Ok(released)
    }

    /// The container this manager was created for.
    #[napi(getter)]
    pub fn container_identifier(&self) -> String {
        self.handle.container().to_string()
    }

    /// Whether the session still accepts operations.
    #[napi(getter)]
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Requests still waiting for the provider.
    #[napi(getter)]
    pub fn pending_count(&self) -> u32 {
        u32::try_from(self.dispatcher.context().pending_count()).unwrap_or(u32::MAX)
    }
}

// ============================================================
// Standalone functions
// ============================================================

/// Send bridge logs to stderr. `RUST_LOG` overrides `filter`.
///
/// Returns false if logging was already set up.
#[napi]
pub fn init_logging(filter: Option<String>) -> bool {
    let filter = filter.unwrap_or_else(|| "info".to_string());
    let installed = cloudkit_bridge::logging::init_logging(&filter);
    if installed {
        tracing::debug!("Logging initialized with filter {}", filter);
    }
    installed
}

// ============================================================
// Tests: helper-level only
//
// napi's Error and JsObject call napi FFI, so test binaries can't
// link against them. We test the conversions here; the JS glue is
// covered by JS integration tests.
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // --- Options ---

    #[test]
    fn no_options_is_degraded_mode() {
        let config = options_to_config(None).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn options_override_defaults() {
        let options = JsManagerOptions {
            provider: Some("native".to_string()),
            unavailable_message: Some("sync off".to_string()),
            completion_timeout_ms: Some(500),
        };
        let config = options_to_config(Some(&options)).unwrap();
        assert_eq!(config.provider.mode, ProviderMode::Native);
        assert_eq!(config.provider.unavailable_message, "sync off");
        assert_eq!(config.relay.completion_timeout_ms, 500);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let options = JsManagerOptions {
            provider: Some("icloud".to_string()),
            ..Default::default()
        };
        let err = options_to_config(Some(&options)).unwrap_err();
        assert!(err.to_string().contains("unknown provider mode"));
    }

    // --- Arguments ---

    #[test]
    fn record_arg_requires_object() {
        let note = serde_json::json!({"id": "n-1", "text": "hi"});
        assert_eq!(
            record_arg(Some(&note), "Note").unwrap(),
            r#"{"id":"n-1","text":"hi"}"#
        );

        assert_eq!(record_arg(None, "Note").unwrap_err(), "Note object required");
        let scalar = serde_json::json!("just a string");
        assert_eq!(
            record_arg(Some(&scalar), "Settings").unwrap_err(),
            "Settings object required"
        );
    }

    #[test]
    fn id_arg_requires_value() {
        assert_eq!(id_arg(None).unwrap_err(), "Item ID required");
        // Empty ids pass through; the bridge rejects them.
        assert_eq!(id_arg(Some(String::new())).unwrap(), "");
    }

    // --- Lifecycle ---

    #[test]
    fn shutdown_hands_back_cleanup_hook_once() {
        let handle =
            SessionHandle::from_config("test-container", &BridgeConfig::default()).unwrap();
        let mut cleanup = Some("hook");

        assert_eq!(release_session(&handle, &mut cleanup), (true, Some("hook")));
        assert!(!handle.is_live());
        assert_eq!(release_session(&handle, &mut cleanup), (false, None));
    }

    // --- Results ---

    #[test]
    fn records_parse_back_to_values() {
        let values = parse_records(vec![r#"{"id":"a"}"#.to_string()]).unwrap();
        assert_eq!(values, vec![serde_json::json!({"id": "a"})]);

        let err = parse_records(vec!["{".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::ProviderFailure(_)));
    }

    #[test]
    fn absent_settings_stay_absent() {
        assert_eq!(parse_record(None).unwrap(), None);
        assert_eq!(
            parse_record(Some(r#"{"theme":"dark"}"#.to_string())).unwrap(),
            Some(serde_json::json!({"theme": "dark"}))
        );
    }

    #[test]
    fn save_result_fields_map_correctly() {
        let js = save_result_to_js(SaveResult::failed("offline"));
        assert!(!js.success);
        assert_eq!(js.error.as_deref(), Some("offline"));

        let js = save_result_to_js(SaveResult::ok());
        assert!(js.success);
        assert!(js.error.is_none());
    }
}
