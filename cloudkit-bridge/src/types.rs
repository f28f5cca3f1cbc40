//! Identifiers and request types for cloudkit-bridge.
//!
//! All types here are flat and owned: `String` instead of `&str`, no
//! lifetimes, so bindings can hold them across an await.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BridgeError;

/// Maximum length of a container identifier, in bytes.
pub const MAX_CONTAINER_ID_LEN: usize = 255;

/// Process-unique identifier of a [`SessionHandle`](crate::SessionHandle).
///
/// Only used for logging and error messages; callers never address a
/// session by this number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Wrap a raw id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate the next id.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

/// Identifier of one in-flight completion within a [`CallerContext`](crate::CallerContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompletionId(u64);

impl CompletionId {
    /// Wrap a raw id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompletionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completion-{}", self.0)
    }
}

/// A validated CloudKit container identifier (e.g. `iCloud.com.example.app`).
///
/// Non-empty, at most [`MAX_CONTAINER_ID_LEN`] bytes, ASCII alphanumerics
/// plus `.`, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Validate and wrap a container identifier.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        if raw.is_empty() {
            return Err(BridgeError::InitializationError(
                "container identifier must not be empty".to_string(),
            ));
        }

        if raw.len() > MAX_CONTAINER_ID_LEN {
            return Err(BridgeError::InitializationError(format!(
                "container identifier must be at most {} bytes, got {}",
                MAX_CONTAINER_ID_LEN,
                raw.len()
            )));
        }

        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(BridgeError::InitializationError(format!(
                "container identifier contains invalid character {:?}",
                bad
            )));
        }

        Ok(Self(raw.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The eight operations exposed across the boundary.
///
/// Settings have no delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Store the settings record.
    SaveSettings,
    /// Fetch the settings record (may be absent).
    FetchSettings,
    /// Store one history item.
    SaveHistoryItem,
    /// Fetch every history item.
    FetchAllHistory,
    /// Delete one history item by id.
    DeleteHistoryItem,
    /// Store one note.
    SaveNote,
    /// Fetch every note.
    FetchAllNotes,
    /// Delete one note by id.
    DeleteNote,
}

/// What a request of a given kind must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRule {
    /// A non-empty serialized JSON record.
    Record,
    /// A non-empty record identifier.
    Identifier,
    /// Nothing.
    None,
}

/// What a successful completion of a given kind resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Success marker plus optional error message.
    Ack,
    /// Zero or one record.
    OptionalRecord,
    /// An ordered, possibly empty list of records.
    Records,
}

impl OperationKind {
    /// Every kind, in boundary order.
    pub const ALL: [OperationKind; 8] = [
        OperationKind::SaveSettings,
        OperationKind::FetchSettings,
        OperationKind::SaveHistoryItem,
        OperationKind::FetchAllHistory,
        OperationKind::DeleteHistoryItem,
        OperationKind::SaveNote,
        OperationKind::FetchAllNotes,
        OperationKind::DeleteNote,
    ];

    /// Payload requirement for this kind.
    pub fn payload_rule(&self) -> PayloadRule {
        match self {
            OperationKind::SaveSettings
            | OperationKind::SaveHistoryItem
            | OperationKind::SaveNote => PayloadRule::Record,
            OperationKind::DeleteHistoryItem | OperationKind::DeleteNote => {
                PayloadRule::Identifier
            }
            OperationKind::FetchSettings
            | OperationKind::FetchAllHistory
            | OperationKind::FetchAllNotes => PayloadRule::None,
        }
    }

    /// Result shape for this kind.
    pub fn result_shape(&self) -> ResultShape {
        match self {
            OperationKind::FetchSettings => ResultShape::OptionalRecord,
            OperationKind::FetchAllHistory | OperationKind::FetchAllNotes => ResultShape::Records,
            _ => ResultShape::Ack,
        }
    }

    /// The method name callers see (`saveNote`, `fetchAllHistory`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::SaveSettings => "saveSettings",
            OperationKind::FetchSettings => "fetchSettings",
            OperationKind::SaveHistoryItem => "saveHistoryItem",
            OperationKind::FetchAllHistory => "fetchAllHistory",
            OperationKind::DeleteHistoryItem => "deleteHistoryItem",
            OperationKind::SaveNote => "saveNote",
            OperationKind::FetchAllNotes => "fetchAllNotes",
            OperationKind::DeleteNote => "deleteNote",
        }
    }

    /// Record noun used in validation messages.
    pub(crate) fn subject(&self) -> &'static str {
        match self {
            OperationKind::SaveSettings | OperationKind::FetchSettings => "settings",
            OperationKind::SaveHistoryItem
            | OperationKind::FetchAllHistory
            | OperationKind::DeleteHistoryItem => "history item",
            OperationKind::SaveNote | OperationKind::FetchAllNotes | OperationKind::DeleteNote => {
                "note"
            }
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One request to the dispatcher.
///
/// The payload is owned: the dispatcher moves it into the provider call and
/// keeps no reference to caller memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    /// Which operation.
    pub kind: OperationKind,
    /// Serialized record or identifier, depending on `kind`.
    pub payload: Option<String>,
}

impl OperationRequest {
    /// A request carrying a payload.
    pub fn new(kind: OperationKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: Some(payload.into()),
        }
    }

    /// A request without payload (the fetch kinds).
    pub fn bare(kind: OperationKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_accepts_reverse_dns_and_plain_names() {
        assert_eq!(
            ContainerId::parse("iCloud.com.example.app").unwrap().as_str(),
            "iCloud.com.example.app"
        );
        assert_eq!(
            ContainerId::parse("test-container").unwrap().to_string(),
            "test-container"
        );
        assert!(ContainerId::parse("under_score.1").is_ok());
    }

    #[test]
    fn container_id_rejects_empty() {
        let err = ContainerId::parse("").unwrap_err();
        assert!(matches!(err, BridgeError::InitializationError(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn container_id_rejects_bad_characters() {
        let err = ContainerId::parse("iCloud com").unwrap_err();
        assert!(err.to_string().contains("invalid character"));

        assert!(ContainerId::parse("a/b").is_err());
        assert!(ContainerId::parse("caf\u{e9}").is_err());
    }

    #[test]
    fn container_id_rejects_overlong() {
        let raw = "a".repeat(MAX_CONTAINER_ID_LEN + 1);
        let err = ContainerId::parse(&raw).unwrap_err();
        assert!(err.to_string().contains("at most 255"));

        let raw = "a".repeat(MAX_CONTAINER_ID_LEN);
        assert!(ContainerId::parse(&raw).is_ok());
    }

    #[test]
    fn handle_ids_are_unique() {
        let a = HandleId::next();
        let b = HandleId::next();
        assert_ne!(a, b);
        assert!(b.value() > a.value());
    }

    #[test]
    fn payload_rules_cover_every_kind() {
        use OperationKind::*;
        assert_eq!(SaveSettings.payload_rule(), PayloadRule::Record);
        assert_eq!(SaveHistoryItem.payload_rule(), PayloadRule::Record);
        assert_eq!(SaveNote.payload_rule(), PayloadRule::Record);
        assert_eq!(DeleteHistoryItem.payload_rule(), PayloadRule::Identifier);
        assert_eq!(DeleteNote.payload_rule(), PayloadRule::Identifier);
        assert_eq!(FetchSettings.payload_rule(), PayloadRule::None);
        assert_eq!(FetchAllHistory.payload_rule(), PayloadRule::None);
        assert_eq!(FetchAllNotes.payload_rule(), PayloadRule::None);
    }

    #[test]
    fn result_shapes() {
        use OperationKind::*;
        assert_eq!(FetchSettings.result_shape(), ResultShape::OptionalRecord);
        assert_eq!(FetchAllHistory.result_shape(), ResultShape::Records);
        assert_eq!(FetchAllNotes.result_shape(), ResultShape::Records);
        for kind in [SaveSettings, SaveHistoryItem, DeleteHistoryItem, SaveNote, DeleteNote] {
            assert_eq!(kind.result_shape(), ResultShape::Ack, "{kind}");
        }
    }

    #[test]
    fn names_match_js_methods() {
        let names: Vec<&str> = OperationKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "saveSettings",
                "fetchSettings",
                "saveHistoryItem",
                "fetchAllHistory",
                "deleteHistoryItem",
                "saveNote",
                "fetchAllNotes",
                "deleteNote",
            ]
        );
    }

    #[test]
    fn request_constructors() {
        let req = OperationRequest::new(OperationKind::DeleteNote, "n-1");
        assert_eq!(req.payload.as_deref(), Some("n-1"));

        let req = OperationRequest::bare(OperationKind::FetchAllNotes);
        assert!(req.payload.is_none());
    }
}
