//! Providers linked in through a C function table.
//!
//! A native CloudKit client (Swift/Objective-C++) exports a
//! [`CloudKitProviderVTable`] whose entry points mirror the bridge's eight
//! operations. Every entry point takes an opaque `ctx` pointer and a
//! callback; the provider must invoke the callback with that `ctx`, from any
//! thread, once. Strings passed to a callback only need to live until the
//! callback returns: they are copied before it does.
//!
//! `ctx` is not a pointer to Rust memory. It is a token looked up in an
//! in-flight table, so a duplicate callback, a callback after shutdown, or a
//! callback with a garbage `ctx` finds nothing and is ignored.

use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{LazyLock, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;

use super::{CloudProvider, ProviderCall};
use crate::error::{BridgeError, ProviderError};
use crate::relay::CompletionSender;
use crate::types::{ContainerId, OperationKind};

/// Callback for save/delete operations.
///
/// `error` may be null on success; on failure it should explain the cause.
pub type AckCallback = unsafe extern "C" fn(ctx: *mut c_void, success: bool, error: *const c_char);

/// Callback for fetch operations.
///
/// A non-null `error` means failure. Otherwise `json` is the serialized
/// result, or null when there is nothing to return.
pub type PayloadCallback =
    unsafe extern "C" fn(ctx: *mut c_void, json: *const c_char, error: *const c_char);

/// Entry point taking a serialized record or identifier.
pub type RecordFn = unsafe extern "C" fn(
    manager: *mut c_void,
    payload: *const c_char,
    ctx: *mut c_void,
    callback: AckCallback,
);

/// Entry point for a fetch.
pub type FetchFn =
    unsafe extern "C" fn(manager: *mut c_void, ctx: *mut c_void, callback: PayloadCallback);

/// Function table exported by a native provider.
#[repr(C)]
pub struct CloudKitProviderVTable {
    /// Create a manager for a container. Null means the provider is unavailable.
    pub init: unsafe extern "C" fn(container: *const c_char) -> *mut c_void,
    /// Save the settings record.
    pub save_settings: RecordFn,
    /// Fetch the settings record.
    pub fetch_settings: FetchFn,
    /// Save one history item.
    pub save_history_item: RecordFn,
    /// Fetch all history items as a JSON array.
    pub fetch_all_history: FetchFn,
    /// Delete one history item by id.
    pub delete_history_item: RecordFn,
    /// Save one note.
    pub save_note: RecordFn,
    /// Fetch all notes as a JSON array.
    pub fetch_all_notes: FetchFn,
    /// Delete one note by id.
    pub delete_note: RecordFn,
    /// Release a manager returned by `init`.
    pub release: Option<unsafe extern "C" fn(manager: *mut c_void)>,
}

static LINKED: OnceLock<&'static CloudKitProviderVTable> = OnceLock::new();

/// Register the vtable of the provider linked into this binary.
///
/// Returns `false` if one was already registered.
pub fn register(vtable: &'static CloudKitProviderVTable) -> bool {
    LINKED.set(vtable).is_ok()
}

/// The registered vtable, if any.
pub fn linked() -> Option<&'static CloudKitProviderVTable> {
    LINKED.get().copied()
}

struct Inflight {
    owner: u64,
    sender: CompletionSender,
}

static INFLIGHT: LazyLock<DashMap<usize, Inflight>> = LazyLock::new(DashMap::new);
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

fn park(owner: u64, sender: CompletionSender) -> usize {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    INFLIGHT.insert(token, Inflight { owner, sender });
    token
}

fn unpark(ctx: *mut c_void) -> Option<CompletionSender> {
    let token = ctx as usize;
    match INFLIGHT.remove(&token) {
        Some((_, inflight)) => Some(inflight.sender),
        None => {
            tracing::debug!("Ignoring native callback for unknown or finished ctx {}", token);
            None
        }
    }
}

/// Borrow a C string for the duration of a callback.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the returned lifetime.
unsafe fn borrow_c_str<'a>(ptr: *const c_char) -> Option<Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy())
    }
}

unsafe extern "C" fn ack_trampoline(ctx: *mut c_void, success: bool, error: *const c_char) {
    let Some(sender) = unpark(ctx) else {
        return;
    };
    if success {
        sender.succeed(None);
    } else {
        let message = unsafe { borrow_c_str(error) };
        sender.fail(message.as_deref().unwrap_or_default());
    }
}

unsafe extern "C" fn payload_trampoline(
    ctx: *mut c_void,
    json: *const c_char,
    error: *const c_char,
) {
    let Some(sender) = unpark(ctx) else {
        return;
    };
    match unsafe { borrow_c_str(error) } {
        Some(message) => sender.fail(&message),
        None => {
            let json = unsafe { borrow_c_str(json) };
            sender.succeed(json.as_deref())
        }
    };
}

struct ManagerPtr(NonNull<c_void>);

// SAFETY: the vtable contract requires every entry point to accept the
// manager from any thread, concurrently. `release` never overlaps a call:
// it runs under the write lock.
unsafe impl Send for ManagerPtr {}
unsafe impl Sync for ManagerPtr {}

/// A provider backed by a [`CloudKitProviderVTable`].
///
/// One provider serves one session at a time: `open` on a provider that is
/// already open is refused.
pub struct NativeProvider {
    vtable: &'static CloudKitProviderVTable,
    /// Read-locked for the whole of every native call.
    manager: RwLock<Option<ManagerPtr>>,
    owner: u64,
}

impl NativeProvider {
    /// Wrap a vtable. Nothing is called until `open`.
    pub fn new(vtable: &'static CloudKitProviderVTable) -> Self {
        Self {
            vtable,
            manager: RwLock::new(None),
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Wrap the vtable registered with [`register`].
    pub fn linked() -> Result<Self, BridgeError> {
        linked().map(Self::new).ok_or_else(|| {
            BridgeError::InitializationError("native provider not linked".to_string())
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<ManagerPtr>> {
        self.manager.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<ManagerPtr>> {
        self.manager.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `open` succeeded and `close` has not run.
    pub fn is_open(&self) -> bool {
        self.read().is_some()
    }

    /// Number of calls still waiting for a native callback.
    pub fn inflight(&self) -> usize {
        INFLIGHT
            .iter()
            .filter(|entry| entry.value().owner == self.owner)
            .count()
    }

    #[cfg(test)]
    fn manager_addr(&self) -> Option<usize> {
        self.read().as_ref().map(|ptr| ptr.0.as_ptr() as usize)
    }

    fn release(&self) {
        // Waits for calls already inside the provider; later ones see `None`.
        let mut guard = self.write();
        let Some(manager) = guard.take() else {
            return;
        };
        if let Some(release) = self.vtable.release {
            unsafe { release(manager.0.as_ptr()) };
        }
        // Whatever the provider never answered is answered for it now.
        INFLIGHT.retain(|_, inflight| inflight.owner != self.owner);
    }
}

impl CloudProvider for NativeProvider {
    fn name(&self) -> &str {
        "native"
    }

    fn open(&self, container: &ContainerId) -> Result<(), ProviderError> {
        let name = CString::new(container.as_str())
            .map_err(|e| ProviderError::Misconfigured(e.to_string()))?;
        let mut guard = self.write();
        if guard.is_some() {
            return Err(ProviderError::Misconfigured(format!(
                "native provider is already serving a session; cannot open {}",
                container
            )));
        }

        let raw = unsafe { (self.vtable.init)(name.as_ptr()) };
        let manager = NonNull::new(raw).ok_or_else(|| {
            ProviderError::Unavailable(format!("native provider refused container {}", container))
        })?;
        *guard = Some(ManagerPtr(manager));
        Ok(())
    }

    fn submit(&self, call: ProviderCall) {
        let guard = self.read();
        let Some(manager) = guard.as_ref().map(|ptr| ptr.0.as_ptr()) else {
            call.completion.fail("native provider is not open");
            return;
        };

        let payload = match CString::new(call.payload.unwrap_or_default()) {
            Ok(payload) => payload,
            Err(_) => {
                call.completion.fail("payload contains a NUL byte");
                return;
            }
        };

        let token = park(self.owner, call.completion);
        let ctx = token as *mut c_void;
        let vt = self.vtable;

        // The provider may call back before these return; `payload` outlives
        // every call because the provider copies what it keeps. `guard` is
        // held until the call returns so `release` cannot run mid-call.
        unsafe {
            match call.kind {
                OperationKind::SaveSettings => {
                    (vt.save_settings)(manager, payload.as_ptr(), ctx, ack_trampoline)
                }
                OperationKind::FetchSettings => {
                    (vt.fetch_settings)(manager, ctx, payload_trampoline)
                }
                OperationKind::SaveHistoryItem => {
                    (vt.save_history_item)(manager, payload.as_ptr(), ctx, ack_trampoline)
                }
                OperationKind::FetchAllHistory => {
                    (vt.fetch_all_history)(manager, ctx, payload_trampoline)
                }
                OperationKind::DeleteHistoryItem => {
                    (vt.delete_history_item)(manager, payload.as_ptr(), ctx, ack_trampoline)
                }
                OperationKind::SaveNote => {
                    (vt.save_note)(manager, payload.as_ptr(), ctx, ack_trampoline)
                }
                OperationKind::FetchAllNotes => {
                    (vt.fetch_all_notes)(manager, ctx, payload_trampoline)
                }
                OperationKind::DeleteNote => {
                    (vt.delete_note)(manager, payload.as_ptr(), ctx, ack_trampoline)
                }
            }
        }
        drop(guard);
    }

    fn close(&self) {
        self.release();
    }
}

impl Drop for NativeProvider {
    fn drop(&mut self) {
        self.release();
    }
}
