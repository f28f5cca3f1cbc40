//! Mock provider for testing.
//!
//! Records every call, answers from a per-kind response queue, and can
//! misbehave on purpose: never call back, call back twice, answer from a
//! background thread, or hold completions until the test releases them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CloudProvider, ProviderCall};
use crate::error::ProviderError;
use crate::relay::CompletionSender;
use crate::types::{ContainerId, HandleId, OperationKind, ResultShape};

/// A scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Succeed with an optional payload.
    Success(Option<String>),
    /// Fail with a message.
    Failure(String),
}

/// How many times (and from where) the mock resolves a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackMode {
    /// Resolve once, on the submitting thread.
    #[default]
    Once,
    /// Resolve twice in a row; the second call must be discarded.
    Twice,
    /// Never resolve; the sender is dropped right away.
    Never,
    /// Keep the sender without resolving; see [`MockProvider::take_held`].
    Hold,
    /// Resolve once from a freshly spawned thread.
    Background,
}

/// A call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Session the call came from.
    pub handle: HandleId,
    /// Container of that session.
    pub container: String,
    /// Which operation.
    pub kind: OperationKind,
    /// The payload as received.
    pub payload: Option<String>,
}

/// Mock provider for testing.
///
/// Clones share state, so a test can keep one clone for inspection and hand
/// another to the session.
#[derive(Debug, Default, Clone)]
pub struct MockProvider {
    inner: Arc<Mutex<MockProviderInner>>,
}

#[derive(Debug, Default)]
struct MockProviderInner {
    calls: Vec<RecordedCall>,
    responses: HashMap<OperationKind, VecDeque<MockResponse>>,
    fail_all: Option<String>,
    fail_next_open: Option<ProviderError>,
    mode: CallbackMode,
    held: Vec<(OperationKind, CompletionSender)>,
    opened: Vec<String>,
    close_count: usize,
}

impl MockProvider {
    /// Create a new mock provider that behaves like an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose every operation fails with `message`.
    pub fn failing(message: &str) -> Self {
        let mock = Self::new();
        mock.fail_all(message);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockProviderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the answer for the next call of `kind`.
    pub fn queue_response(&self, kind: OperationKind, response: MockResponse) {
        self.lock()
            .responses
            .entry(kind)
            .or_default()
            .push_back(response);
    }

    /// Make every operation fail with `message`.
    pub fn fail_all(&self, message: &str) {
        self.lock().fail_all = Some(message.to_string());
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: ProviderError) {
        self.lock().fail_next_open = Some(error);
    }

    /// Set how completions are delivered.
    pub fn set_callback_mode(&self, mode: CallbackMode) {
        self.lock().mode = mode;
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Containers opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /// How many times `close()` ran.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Take the completions kept in [`CallbackMode::Hold`].
    pub fn take_held(&self) -> Vec<(OperationKind, CompletionSender)> {
        std::mem::take(&mut self.lock().held)
    }

    /// The answer the next call of `kind` gets.
    fn next_response(inner: &mut MockProviderInner, kind: OperationKind) -> MockResponse {
        if let Some(message) = &inner.fail_all {
            return MockResponse::Failure(message.clone());
        }
        if let Some(response) = inner.responses.get_mut(&kind).and_then(VecDeque::pop_front) {
            return response;
        }
        match kind.result_shape() {
            ResultShape::Ack | ResultShape::OptionalRecord => MockResponse::Success(None),
            ResultShape::Records => MockResponse::Success(Some("[]".to_string())),
        }
    }
}

fn deliver(completion: &CompletionSender, response: &MockResponse) -> bool {
    match response {
        MockResponse::Success(payload) => completion.succeed(payload.as_deref()),
        MockResponse::Failure(message) => completion.fail(message),
    }
}

impl CloudProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self, container: &ContainerId) -> Result<(), ProviderError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(error);
        }
        inner.opened.push(container.to_string());
        Ok(())
    }

    fn submit(&self, call: ProviderCall) {
        let (mode, response) = {
            let mut inner = self.lock();
            inner.calls.push(RecordedCall {
                handle: call.handle,
                container: call.container.to_string(),
                kind: call.kind,
                payload: call.payload.clone(),
            });
            let response = Self::next_response(&mut inner, call.kind);
            if inner.mode == CallbackMode::Hold {
                inner.held.push((call.kind, call.completion));
                return;
            }
            (inner.mode, response)
        };

        // The lock is released before resolving: resolution may run caller code.
        let completion = call.completion;
        match mode {
            CallbackMode::Once => {
                deliver(&completion, &response);
            }
            CallbackMode::Twice => {
                deliver(&completion, &response);
                deliver(&completion, &response);
            }
            CallbackMode::Never => drop(completion),
            CallbackMode::Background => {
                std::thread::spawn(move || deliver(&completion, &response));
            }
            CallbackMode::Hold => {}
        }
    }

    fn close(&self) {
        self.lock().close_count += 1;
    }
}
