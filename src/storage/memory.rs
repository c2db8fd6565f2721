//! In-memory message store.
//!
//! Not durable. Used as a stand-in for the relational store in tests of the
//! dispatch path and the query service; it can be switched to an unavailable
//! state to exercise failure handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ChatMessage, MessageStore, NewChatMessage, StoreError};
use crate::now_millis;

#[derive(Debug, Default)]
struct Rows {
    items: Vec<ChatMessage>,
    next_id: i64,
}

/// Message store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rows: Mutex<Rows>,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Vec<ChatMessage> {
        self.lock().items.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl MessageStore for MemoryMessageStore {
    fn insert(&self, message: &NewChatMessage) -> Result<i64, StoreError> {
        self.check_available()?;

        let mut rows = self.lock();
        rows.next_id += 1;
        let id = rows.next_id;
        rows.items.push(ChatMessage {
            id,
            nickname: message.nickname.clone(),
            message: message.message.clone(),
            client_id: message.client_id.clone(),
            created_at: now_millis(),
        });
        Ok(id)
    }

    fn select_recent(&self, limit: u32) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;

        let rows = self.lock();
        Ok(rows
            .items
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
