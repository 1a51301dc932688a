use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::{MessageStore, StoreError};
use crate::models::{DeliveryState, Message};

/// Everything a store holds, in a form that serializes cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub local_paths: Vec<LocalPathEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPathEntry {
    pub conversation_id: u64,
    pub message_id: u64,
    pub path: PathBuf,
}

#[derive(Default)]
struct Inner {
    messages: HashMap<String, Message>, // unique token -> message
    local_paths: HashMap<(u64, u64), PathBuf>,
}

/// Message store backed by a map, keyed by unique token.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut inner = Inner::default();
        for message in snapshot.messages {
            inner.messages.insert(message.unique_token.clone(), message);
        }
        for entry in snapshot.local_paths {
            inner
                .local_paths
                .insert((entry.conversation_id, entry.message_id), entry.path);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let local_paths = inner
            .local_paths
            .iter()
            .map(|((conversation_id, message_id), path)| LocalPathEntry {
                conversation_id: *conversation_id,
                message_id: *message_id,
                path: path.clone(),
            })
            .collect();
        Snapshot {
            messages,
            local_paths,
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch_pending_messages(&self) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        // A record left in `Sending` belongs to an attempt that never finished.
        let mut pending: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| matches!(m.state, DeliveryState::Pending | DeliveryState::Sending))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(pending)
    }

    async fn get_message(
        &self,
        server_id: Option<u64>,
        unique_token: &str,
    ) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        if let Some(found) = inner.messages.get(unique_token) {
            return Ok(Some(found.clone()));
        }
        let found = server_id.and_then(|id| {
            inner
                .messages
                .values()
                .find(|m| m.id == Some(id))
                .cloned()
        });
        Ok(found)
    }

    async fn upsert(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(id) = message.id {
            // Drop a copy of the same server message stored under another token.
            inner
                .messages
                .retain(|token, m| m.id != Some(id) || token == &message.unique_token);
        }
        debug!("Storing message {} as {:?}", message.label(), message.state);
        inner
            .messages
            .insert(message.unique_token.clone(), message.clone());
        Ok(())
    }

    async fn record_local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
        path: &Path,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .local_paths
            .insert((conversation_id, message_id), path.to_path_buf());
        Ok(())
    }

    async fn local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
    ) -> Result<Option<PathBuf>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.local_paths.get(&(conversation_id, message_id)).cloned())
    }
}
