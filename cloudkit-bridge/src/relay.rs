//! Completion relay: delivers each provider outcome to its caller exactly once.
//!
//! Every dispatched request owns one completion slot with its own lock:
//!
//! ```text
//!            resolve (first writer)
//! Pending ─────────────────────────► Resolved
//!    │
//!    └─── teardown / caller drop ──► Cancelled
//! ```
//!
//! The provider gets a [`CompletionSender`] and may call it from any thread,
//! any number of times. Only the transition out of `Pending` delivers; later
//! calls are discarded. Delivery is a send on a oneshot channel, so the
//! provider thread never touches caller state: the caller's executor picks
//! the result up when it polls its [`PendingCompletion`].
//!
//! A [`CallerContext`] stands for the caller's execution context (one JS
//! environment, one CLI run). Tearing it down cancels everything still
//! pending and makes every later callback a no-op.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Sleep;

use crate::error::BridgeError;
use crate::handle::SessionHandle;
use crate::provider::ProviderOutcome;
use crate::types::{CompletionId, HandleId, OperationKind};

/// Raw result of one operation: an optional serialized payload, or an error.
pub type OperationResult = Result<Option<String>, BridgeError>;

enum SlotState {
    Pending(oneshot::Sender<OperationResult>),
    Resolved,
    Cancelled,
}

struct CompletionSlot {
    id: CompletionId,
    kind: OperationKind,
    state: Mutex<SlotState>,
    context: Weak<ContextShared>,
}

impl CompletionSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_pending(&self) -> bool {
        matches!(*self.lock(), SlotState::Pending(_))
    }

    /// Pending → Resolved, unless the caller context is gone, in which case
    /// Pending → Cancelled. Liveness is read under the slot lock.
    fn resolve(&self, result: OperationResult) -> bool {
        let delivered = {
            let mut state = self.lock();
            if !matches!(*state, SlotState::Pending(_)) {
                return false;
            }
            if self.context_live() {
                Self::finish(&mut state, SlotState::Resolved, result)
            } else {
                Self::finish(&mut state, SlotState::Cancelled, Err(BridgeError::Cancelled));
                false
            }
        };
        self.unregister();
        delivered
    }

    /// Pending → Cancelled.
    fn cancel(&self) -> bool {
        let cancelled = {
            let mut state = self.lock();
            Self::finish(&mut state, SlotState::Cancelled, Err(BridgeError::Cancelled))
        };
        self.unregister();
        cancelled
    }

    fn finish(state: &mut SlotState, next: SlotState, result: OperationResult) -> bool {
        match std::mem::replace(state, next) {
            SlotState::Pending(tx) => {
                // The receiver may already be gone; that is the caller's business.
                let _ = tx.send(result);
                true
            }
            previous => {
                *state = previous;
                false
            }
        }
    }

    fn context_live(&self) -> bool {
        self.context
            .upgrade()
            .is_some_and(|ctx| ctx.live.load(Ordering::Acquire))
    }

    fn unregister(&self) {
        if let Some(ctx) = self.context.upgrade() {
            ctx.pending.remove(&self.id);
        }
    }
}

// ============================================================
// Provider side
// ============================================================

/// The provider's end of one completion.
///
/// Cheap to clone, `Send + Sync`, callable from any thread. The first
/// `resolve` wins; every later call returns `false` and does nothing.
/// If every clone is dropped without resolving, the caller receives a
/// [`BridgeError::ProviderFailure`] instead of waiting forever.
#[derive(Clone)]
pub struct CompletionSender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    slot: Arc<CompletionSlot>,
}

impl Drop for SenderInner {
    fn drop(&mut self) {
        let kind = self.slot.kind;
        if self.slot.resolve(Err(BridgeError::ProviderFailure(format!(
            "provider dropped {} without completing it",
            kind
        )))) {
            tracing::warn!(
                "Provider dropped {} ({}) without completing it",
                self.slot.id,
                kind
            );
        }
    }
}

impl CompletionSender {
    /// Deliver the provider's outcome.
    ///
    /// Borrowed strings are copied before this returns, so the provider may
    /// free its buffers as soon as the call completes. Returns `true` only
    /// for the call that actually resolved the completion.
    pub fn resolve(&self, outcome: ProviderOutcome<'_>) -> bool {
        let slot = &self.inner.slot;
        let delivered = slot.resolve(outcome.into_result());
        if delivered {
            tracing::debug!("Resolved {} ({})", slot.id, slot.kind);
        } else {
            tracing::debug!(
                "Discarding late or duplicate completion for {} ({})",
                slot.id,
                slot.kind
            );
        }
        delivered
    }

    /// Resolve successfully, with or without a payload.
    pub fn succeed(&self, payload: Option<&str>) -> bool {
        self.resolve(ProviderOutcome::Success(payload))
    }

    /// Resolve with a failure message.
    pub fn fail(&self, message: &str) -> bool {
        self.resolve(ProviderOutcome::Failure(message))
    }

    /// Which completion this sender resolves.
    pub fn id(&self) -> CompletionId {
        self.inner.slot.id
    }

    /// Which operation this sender resolves.
    pub fn kind(&self) -> OperationKind {
        self.inner.slot.kind
    }

    /// Whether the completion is still waiting for an outcome.
    pub fn is_pending(&self) -> bool {
        self.inner.slot.is_pending()
    }
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender")
            .field("id", &self.inner.slot.id)
            .field("kind", &self.inner.slot.kind)
            .finish()
    }
}

// ============================================================
// Caller side
// ============================================================

/// Future for one dispatched request. Resolves exactly once.
///
/// Holds a clone of its session, so the session outlives every completion
/// issued against it. Dropping it before resolution cancels the request;
/// a provider callback arriving afterwards is discarded.
pub struct PendingCompletion {
    slot: Arc<CompletionSlot>,
    rx: oneshot::Receiver<OperationResult>,
    timeout: Option<Duration>,
    timer: Option<Pin<Box<Sleep>>>,
    done: bool,
    _context: CallerContext,
    session: SessionHandle,
}

impl PendingCompletion {
    /// Which completion this is.
    pub fn id(&self) -> CompletionId {
        self.slot.id
    }

    /// Which operation this completes.
    pub fn kind(&self) -> OperationKind {
        self.slot.kind
    }

    /// The session the request was dispatched against.
    pub fn handle_id(&self) -> HandleId {
        self.session.id()
    }

    /// Give up with [`BridgeError::ProviderFailure`] if the provider has not
    /// answered within `limit`. The timer starts on first poll.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self.timer = None;
        self
    }
}

impl Future for PendingCompletion {
    type Output = OperationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Poll::Ready(received) = Pin::new(&mut this.rx).poll(cx) {
            this.done = true;
            return Poll::Ready(received.unwrap_or(Err(BridgeError::Cancelled)));
        }

        if let Some(limit) = this.timeout {
            let timer = this
                .timer
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(limit)));
            if timer.as_mut().poll(cx).is_ready() {
                // Resolve through the slot so the provider's late answer is
                // discarded like any other duplicate. Whoever won is in `rx`.
                this.slot.resolve(Err(BridgeError::ProviderFailure(format!(
                    "{} timed out after {} ms",
                    this.slot.kind,
                    limit.as_millis()
                ))));
                this.done = true;
                return Poll::Ready(this.rx.try_recv().unwrap_or(Err(BridgeError::Cancelled)));
            }
        }

        Poll::Pending
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        if !self.done && self.slot.cancel() {
            tracing::debug!("Caller dropped {} ({})", self.slot.id, self.slot.kind);
        }
    }
}

impl fmt::Debug for PendingCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCompletion")
            .field("id", &self.slot.id)
            .field("kind", &self.slot.kind)
            .field("handle", &self.session.id())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================
// Caller context
// ============================================================

struct ContextShared {
    label: String,
    live: AtomicBool,
    next_id: AtomicU64,
    pending: DashMap<CompletionId, Arc<CompletionSlot>>,
}

/// The caller's execution context, as seen by the relay.
///
/// Clones share state. Pending completions are tracked in a sharded map,
/// so unrelated requests never contend on one lock.
#[derive(Clone)]
pub struct CallerContext {
    shared: Arc<ContextShared>,
}

impl CallerContext {
    /// A new live context. `label` only appears in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(ContextShared {
                label: label.into(),
                live: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
            }),
        }
    }

    /// The label given at construction.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Whether the context still accepts and delivers completions.
    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Number of completions still waiting for the provider.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Tear the context down: cancel every pending completion and discard
    /// any callback that arrives later. Idempotent.
    ///
    /// Returns how many completions were cancelled by this call.
    pub fn teardown(&self) -> usize {
        if !self.shared.live.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let slots: Vec<Arc<CompletionSlot>> = self
            .shared
            .pending
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.shared.pending.clear();

        let cancelled = slots.iter().filter(|slot| slot.cancel()).count();
        if cancelled > 0 {
            tracing::warn!(
                "Caller context {} torn down with {} pending completion(s)",
                self.shared.label,
                cancelled
            );
        } else {
            tracing::debug!("Caller context {} torn down", self.shared.label);
        }
        cancelled
    }

    /// Register a new completion for `kind` against `session`.
    ///
    /// Fails with [`BridgeError::Cancelled`] once the context is torn down.
    pub(crate) fn open_completion(
        &self,
        kind: OperationKind,
        session: &SessionHandle,
        timeout: Option<Duration>,
    ) -> Result<(CompletionSender, PendingCompletion), BridgeError> {
        if !self.is_live() {
            return Err(BridgeError::Cancelled);
        }

        let id = CompletionId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(CompletionSlot {
            id,
            kind,
            state: Mutex::new(SlotState::Pending(tx)),
            context: Arc::downgrade(&self.shared),
        });
        self.shared.pending.insert(id, Arc::clone(&slot));

        // A teardown racing with this registration may have missed the slot.
        if !self.is_live() {
            slot.cancel();
            return Err(BridgeError::Cancelled);
        }

        let sender = CompletionSender {
            inner: Arc::new(SenderInner {
                slot: Arc::clone(&slot),
            }),
        };
        let pending = PendingCompletion {
            slot,
            rx,
            timeout,
            timer: None,
            done: false,
            _context: self.clone(),
            session: session.clone(),
        };
        Ok((sender, pending))
    }
}

impl fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerContext")
            .field("label", &self.shared.label)
            .field("live", &self.is_live())
            .field("pending", &self.pending_count())
            .finish()
    }
}
