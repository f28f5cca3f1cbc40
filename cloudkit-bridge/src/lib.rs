//! # cloudkit-bridge
//!
//! Async completion bridge exposing CloudKit sync operations (settings,
//! history items, notes) to a managed-runtime caller such as Node.js.
//!
//! The crate is binding-agnostic: `cloudkit-node` (napi-rs) and
//! `cloudkit-cli` both drive it through the same four pieces.
//!
//! ```text
//! caller ──► Dispatcher ──► CloudProvider::submit ──► (provider thread)
//!   ▲            │                                          │
//!   │            └── PendingCompletion ◄── CompletionSender ┘
//!   └──────────── resolved exactly once
//! ```
//!
//! - [`SessionHandle`]: capability for one provider session, scoped by a
//!   container identifier. Dispatch on a shut-down handle fails with
//!   [`BridgeError::InvalidHandle`].
//! - [`Dispatcher`]: validates requests synchronously, copies the payload,
//!   and hands exactly one call to the provider.
//! - [`relay`]: the completion state machine. Provider callbacks may arrive
//!   on any thread, any number of times; only the first one is delivered,
//!   and nothing is delivered after the caller context is torn down.
//! - [`channel`]: shapes raw results into what the caller sees
//!   ([`SaveResult`], record lists, an optional settings record).
//!
//! ## Degraded mode
//!
//! With no provider configured the [`DisabledProvider`] answers every
//! save/delete with a failure message and every fetch with empty data, so
//! applications run unchanged without CloudKit set up.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod logging;
pub mod provider;
pub mod relay;
pub mod types;

pub use channel::{AckCompletion, RecordCompletion, RecordsCompletion, SaveResult};
pub use config::{BridgeConfig, ConfigError, ProviderMode};
pub use dispatch::Dispatcher;
pub use error::{BridgeError, ProviderError};
pub use handle::SessionHandle;
pub use provider::{
    AsyncCloudProvider, CloudProvider, DisabledProvider, MockProvider, ProviderCall,
    ProviderOutcome, Spawned,
};
pub use relay::{CallerContext, CompletionSender, OperationResult, PendingCompletion};
pub use types::{
    CompletionId, ContainerId, HandleId, OperationKind, OperationRequest, PayloadRule,
    ResultShape,
};
