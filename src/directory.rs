use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Local;

use crate::chat::ChatRecord;
use crate::error::StoreError;
use crate::storage::ChatStore;

/// Navigation over stored chats: list newest-first, create, delete.
#[derive(Clone)]
pub struct ChatDirectory<S> {
    store: Arc<S>,
}

impl<S: ChatStore> ChatDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// All stored chats, newest first. Ids are creation timestamps in
    /// milliseconds, so numeric-descending order is recency order.
    pub async fn list(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let mut records = self.store.list_chats().await?;
        records.sort_by(|a, b| compare_ids_desc(&a.id, &b.id));
        Ok(records)
    }

    /// Create and persist a fresh empty chat, returning the record so the
    /// caller can adopt it as active without a second round trip.
    pub async fn create_chat(&self) -> Result<ChatRecord, StoreError> {
        let now = Local::now();
        let id = now.timestamp_millis().to_string();
        let name = format!("Session-{}", now.format("%Y-%m-%d-%H-%M-%S"));
        self.store.save_chat(&id, Some(&name), Some(&[])).await?;
        tracing::info!(chat = %id, name = %name, "chat created");
        Ok(ChatRecord { id, name, messages: Vec::new() })
    }

    /// Delete from the store first; the caller must not drop the chat from
    /// its own listing until this returns Ok.
    pub async fn delete_chat(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_chat(id).await
    }
}

fn compare_ids_desc(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        // Non-numeric ids sort after numeric ones, lexicographic descending
        // among themselves. Only reachable if records were created by hand.
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => b.cmp(a),
    }
}
