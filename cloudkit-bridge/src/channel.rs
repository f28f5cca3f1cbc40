//! Result channel: shapes raw completion results for the caller.
//!
//! | Kinds        | Caller sees                              |
//! |--------------|------------------------------------------|
//! | Save/Delete  | [`SaveResult`], never an error           |
//! | FetchAll*    | `Result<Vec<String>, BridgeError>`       |
//! | FetchSettings| `Result<Option<String>, BridgeError>`    |

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;
use crate::provider::UNKNOWN_PROVIDER_ERROR;
use crate::relay::{OperationResult, PendingCompletion};
use crate::types::OperationKind;

/// Outcome of a save or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveResult {
    /// Whether the provider accepted the change.
    pub success: bool,
    /// Why it did not. Present and non-empty whenever `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveResult {
    /// A successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed acknowledgement. A blank message is replaced so callers
    /// always get something to show.
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_PROVIDER_ERROR.to_string()
        } else {
            message
        };
        Self {
            success: false,
            error: Some(message),
        }
    }
}

impl From<OperationResult> for SaveResult {
    fn from(result: OperationResult) -> Self {
        match result {
            Ok(_) => SaveResult::ok(),
            Err(err) => SaveResult::failed(err.message()),
        }
    }
}

/// Split a fetch-all payload into one serialized record per element.
///
/// No payload or JSON `null` is an empty store.
pub fn into_records(
    kind: OperationKind,
    payload: Option<String>,
) -> Result<Vec<String>, BridgeError> {
    let Some(text) = payload else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        BridgeError::ProviderFailure(format!("{} returned malformed JSON: {}", kind, e))
    })?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().map(Value::to_string).collect()),
        other => Err(BridgeError::ProviderFailure(format!(
            "{} returned {} instead of an array",
            kind,
            json_type(&other)
        ))),
    }
}

/// Normalize a single-record payload. JSON `null` counts as absent.
pub fn into_optional_record(
    kind: OperationKind,
    payload: Option<String>,
) -> Result<Option<String>, BridgeError> {
    let Some(text) = payload else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        BridgeError::ProviderFailure(format!("{} returned malformed JSON: {}", kind, e))
    })?;
    if value.is_null() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

macro_rules! shaped_completion {
    ($(#[$meta:meta])* $name:ident => $output:ty, |$kind:ident, $result:ident| $shape:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            inner: PendingCompletion,
        }

        impl $name {
            pub(crate) fn new(inner: PendingCompletion) -> Self {
                Self { inner }
            }

            /// The underlying untyped completion.
            pub fn into_inner(self) -> PendingCompletion {
                self.inner
            }
        }

        impl Future for $name {
            type Output = $output;

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let $kind = self.inner.kind();
                Pin::new(&mut self.inner).poll(cx).map(|$result| $shape)
            }
        }
    };
}

shaped_completion!(
    /// Pending save or delete. Failures fold into [`SaveResult`].
    AckCompletion => SaveResult,
    |_kind, result| SaveResult::from(result)
);

shaped_completion!(
    /// Pending fetch-all.
    RecordsCompletion => Result<Vec<String>, BridgeError>,
    |kind, result| result.and_then(|payload| into_records(kind, payload))
);

shaped_completion!(
    /// Pending settings fetch.
    RecordCompletion => Result<Option<String>, BridgeError>,
    |kind, result| result.and_then(|payload| into_optional_record(kind, payload))
);
