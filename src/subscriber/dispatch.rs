//! Per-message dispatch: decode, validate, normalize, persist.
//!
//! [`decode_event`] is pure and turns raw payload bytes into a
//! [`NewChatMessage`] or a [`DispatchError`]. [`Dispatcher`] composes it with
//! the store insert. Every failure is contained to the message that caused it.

use serde::de::Error as _;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::observability::metrics::{record_dropped, record_persisted};
use crate::storage::{MessageStore, NewChatMessage, StoreError};

/// Maximum stored nickname length, in characters.
pub const NICKNAME_MAX_CHARS: usize = 50;

/// Maximum stored client id length, in characters.
pub const CLIENT_ID_MAX_CHARS: usize = 100;

/// Characters of the message body included in the success log line.
const LOG_PREVIEW_CHARS: usize = 50;

/// Wire shape of a chat event. Unknown fields are ignored; `null` counts as absent.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "clientId")]
    client_id: Option<String>,
}

/// Why a payload did not become a row.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid chat event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event has no text")]
    EmptyText,
}

impl DispatchError {
    /// Short label used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::Utf8(_) => "utf8",
            DispatchError::Json(_) => "json",
            DispatchError::EmptyText => "empty_text",
        }
    }
}

/// Field defaults and length caps applied to inbound events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRules {
    pub default_nickname: String,
    pub nickname_max_chars: usize,
    pub client_id_max_chars: usize,
}

impl Default for IngestRules {
    fn default() -> Self {
        Self {
            default_nickname: "unknown sender".into(),
            nickname_max_chars: NICKNAME_MAX_CHARS,
            client_id_max_chars: CLIENT_ID_MAX_CHARS,
        }
    }
}

/// Truncate to at most `max_chars` Unicode scalar values.
fn truncate_chars(mut value: String, max_chars: usize) -> String {
    if let Some((byte_idx, _)) = value.char_indices().nth(max_chars) {
        value.truncate(byte_idx);
    }
    value
}

/// Decode and validate a raw payload.
pub fn decode_event(payload: &[u8], rules: &IngestRules) -> Result<NewChatMessage, DispatchError> {
    let text = std::str::from_utf8(payload)?;
    // A derived struct also accepts a positional array; only objects are events.
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(serde_json::Error::custom("expected a JSON object").into());
    }
    let event: InboundEvent = serde_json::from_value(value)?;

    let message = event.text.unwrap_or_default();
    if message.is_empty() {
        return Err(DispatchError::EmptyText);
    }

    let nickname = event
        .nickname
        .unwrap_or_else(|| rules.default_nickname.clone());

    Ok(NewChatMessage {
        nickname: truncate_chars(nickname, rules.nickname_max_chars),
        message,
        client_id: truncate_chars(event.client_id.unwrap_or_default(), rules.client_id_max_chars),
    })
}

/// Result of dispatching one payload.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A row was inserted with this id.
    Persisted { id: i64 },
    /// The payload was dropped before reaching the store.
    Rejected(DispatchError),
    /// The store refused the insert; the message is dropped.
    StoreFailed(StoreError),
}

impl DispatchOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, DispatchOutcome::Persisted { .. })
    }
}

/// Runs the decode/validate/persist path for inbound payloads.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    rules: IngestRules,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MessageStore>, rules: IngestRules) -> Self {
        Self { store, rules }
    }

    /// Dispatch one payload on the blocking pool.
    ///
    /// Never returns an error: failures are logged and reported through the
    /// outcome so the caller can go on with the next message.
    pub async fn dispatch<P>(&self, payload: P) -> DispatchOutcome
    where
        P: AsRef<[u8]> + Send + 'static,
    {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.dispatch_blocking(payload.as_ref())).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Dispatch task failed");
                record_dropped("store");
                DispatchOutcome::StoreFailed(StoreError::Task(e.to_string()))
            }
        }
    }

    /// Dispatch one payload on the calling thread.
    pub fn dispatch_blocking(&self, payload: &[u8]) -> DispatchOutcome {
        let message = match decode_event(payload, &self.rules) {
            Ok(message) => message,
            Err(e) => {
                match &e {
                    DispatchError::EmptyText => {
                        tracing::debug!("Dropping event without text");
                    }
                    DispatchError::Utf8(_) | DispatchError::Json(_) => {
                        tracing::warn!(
                            error = %e,
                            payload = %String::from_utf8_lossy(payload),
                            "Dropping malformed payload"
                        );
                    }
                }
                record_dropped(e.reason());
                return DispatchOutcome::Rejected(e);
            }
        };

        match self.store.insert(&message) {
            Ok(id) => {
                let preview: String = message.message.chars().take(LOG_PREVIEW_CHARS).collect();
                tracing::info!(id, nickname = %message.nickname, preview = %preview, "Message stored");
                record_persisted();
                DispatchOutcome::Persisted { id }
            }
            Err(e) => {
                tracing::error!(error = %e, nickname = %message.nickname, "Failed to store message");
                record_dropped("store");
                DispatchOutcome::StoreFailed(e)
            }
        }
    }
}
