//! Operation dispatcher: synchronous validation, then one provider call.
//!
//! `dispatch` never blocks and never calls the provider for a request it
//! rejects. Checks run in a fixed order: handle liveness, caller context
//! liveness, payload shape.

use std::time::Duration;

use crate::channel::{AckCompletion, RecordCompletion, RecordsCompletion};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handle::SessionHandle;
use crate::provider::ProviderCall;
use crate::relay::{CallerContext, PendingCompletion};
use crate::types::{OperationKind, OperationRequest, PayloadRule};

/// Dispatches requests from one caller context.
///
/// Cheap to clone; clones share the context.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: CallerContext,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// A dispatcher for `context` with no completion timeout.
    pub fn new(context: CallerContext) -> Self {
        Self {
            context,
            timeout: None,
        }
    }

    /// Bound every completion this dispatcher issues.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A dispatcher using the relay settings from `config`.
    pub fn from_config(context: CallerContext, config: &BridgeConfig) -> Self {
        Self::new(context).with_timeout(config.completion_timeout())
    }

    /// The caller context completions are registered with.
    pub fn context(&self) -> &CallerContext {
        &self.context
    }

    /// Validate `request` and hand it to the provider behind `handle`.
    ///
    /// Errors here are synchronous; the provider has not been called.
    pub fn dispatch(
        &self,
        handle: &SessionHandle,
        request: OperationRequest,
    ) -> Result<PendingCompletion, BridgeError> {
        if !handle.is_live() {
            return Err(BridgeError::InvalidHandle(handle.id()));
        }
        if !self.context.is_live() {
            return Err(BridgeError::Cancelled);
        }
        validate(&request)?;

        let OperationRequest { kind, payload } = request;
        let (completion, pending) = self.context.open_completion(kind, handle, self.timeout)?;
        tracing::debug!(
            "Dispatching {} ({}) on {} for {}",
            pending.id(),
            kind,
            handle.id(),
            self.context.label()
        );

        handle.submit(ProviderCall {
            handle: handle.id(),
            container: handle.container().clone(),
            kind,
            payload,
            completion,
        });
        Ok(pending)
    }

    /// Store the settings record.
    pub fn save_settings(
        &self,
        handle: &SessionHandle,
        settings: impl Into<String>,
    ) -> Result<AckCompletion, BridgeError> {
        self.ack(handle, OperationRequest::new(OperationKind::SaveSettings, settings))
    }

    /// Fetch the settings record, if one was ever saved.
    pub fn fetch_settings(&self, handle: &SessionHandle) -> Result<RecordCompletion, BridgeError> {
        let pending = self.dispatch(handle, OperationRequest::bare(OperationKind::FetchSettings))?;
        Ok(RecordCompletion::new(pending))
    }

    /// Store one history item.
    pub fn save_history_item(
        &self,
        handle: &SessionHandle,
        item: impl Into<String>,
    ) -> Result<AckCompletion, BridgeError> {
        self.ack(handle, OperationRequest::new(OperationKind::SaveHistoryItem, item))
    }

    /// Fetch every history item.
    pub fn fetch_all_history(
        &self,
        handle: &SessionHandle,
    ) -> Result<RecordsCompletion, BridgeError> {
        self.records(handle, OperationKind::FetchAllHistory)
    }

    /// Delete one history item by id.
    pub fn delete_history_item(
        &self,
        handle: &SessionHandle,
        id: impl Into<String>,
    ) -> Result<AckCompletion, BridgeError> {
        self.ack(handle, OperationRequest::new(OperationKind::DeleteHistoryItem, id))
    }

    /// Store one note.
    pub fn save_note(
        &self,
        handle: &SessionHandle,
        note: impl Into<String>,
    ) -> Result<AckCompletion, BridgeError> {
        self.ack(handle, OperationRequest::new(OperationKind::SaveNote, note))
    }

    /// Fetch every note.
    pub fn fetch_all_notes(
        &self,
        handle: &SessionHandle,
    ) -> Result<RecordsCompletion, BridgeError> {
        self.records(handle, OperationKind::FetchAllNotes)
    }

    /// Delete one note by id.
    pub fn delete_note(
        &self,
        handle: &SessionHandle,
        id: impl Into<String>,
    ) -> Result<AckCompletion, BridgeError> {
        self.ack(handle, OperationRequest::new(OperationKind::DeleteNote, id))
    }

    fn ack(
        &self,
        handle: &SessionHandle,
        request: OperationRequest,
    ) -> Result<AckCompletion, BridgeError> {
        self.dispatch(handle, request).map(AckCompletion::new)
    }

    fn records(
        &self,
        handle: &SessionHandle,
        kind: OperationKind,
    ) -> Result<RecordsCompletion, BridgeError> {
        self.dispatch(handle, OperationRequest::bare(kind))
            .map(RecordsCompletion::new)
    }
}

/// Check that the payload matches what `request.kind` expects.
pub fn validate(request: &OperationRequest) -> Result<(), BridgeError> {
    let kind = request.kind;
    let subject = kind.subject();
    match (kind.payload_rule(), request.payload.as_deref()) {
        (PayloadRule::None, None) => Ok(()),
        (PayloadRule::None, Some(_)) => Err(BridgeError::InvalidArgument(format!(
            "{} takes no arguments",
            kind
        ))),
        (PayloadRule::Record, None) => Err(BridgeError::InvalidArgument(format!(
            "{} requires a {} object",
            kind, subject
        ))),
        (PayloadRule::Record, Some(record)) => {
            if record.trim().is_empty() {
                return Err(BridgeError::InvalidArgument(format!(
                    "{} record must not be empty",
                    subject
                )));
            }
            Ok(())
        }
        (PayloadRule::Identifier, None) => Err(BridgeError::InvalidArgument(format!(
            "{} requires a {} id",
            kind, subject
        ))),
        (PayloadRule::Identifier, Some(id)) => {
            if id.trim().is_empty() {
                return Err(BridgeError::InvalidArgument(format!(
                    "{} id must not be empty",
                    subject
                )));
            }
            if id.chars().any(char::is_control) {
                return Err(BridgeError::InvalidArgument(format!(
                    "{} id must not contain control characters",
                    subject
                )));
            }
            Ok(())
        }
    }
}
