//! Read side of Chatlog.
//!
//! [`QueryService`] answers "most recent messages" from the store and fails
//! open: a store error yields an empty list, never an error to the caller.

pub mod http;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::observability::metrics::record_query;
use crate::storage::{ChatMessage, MessageStore, DEFAULT_RECENT_LIMIT};

/// Public shape of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub nickname: String,
    pub text: String,
}

impl From<ChatMessage> for MessageView {
    fn from(row: ChatMessage) -> Self {
        Self {
            nickname: row.nickname,
            text: row.message,
        }
    }
}

/// Serves the most recent messages.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn MessageStore>,
    limit: u32,
}

impl QueryService {
    /// Create a query service returning at most 100 messages.
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            limit: DEFAULT_RECENT_LIMIT,
        }
    }

    /// Most recent messages first. Empty on any store failure.
    pub async fn recent_messages(&self) -> Vec<MessageView> {
        let store = Arc::clone(&self.store);
        let limit = self.limit;

        match tokio::task::spawn_blocking(move || store.select_recent(limit)).await {
            Ok(Ok(rows)) => {
                record_query("ok");
                rows.into_iter().map(MessageView::from).collect()
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to load recent messages");
                record_query("fail_open");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(error = %e, "Recent messages task failed");
                record_query("fail_open");
                Vec::new()
            }
        }
    }
}
