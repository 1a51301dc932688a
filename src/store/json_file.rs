// Message store persisted as a pretty-printed JSON snapshot
//
// Reads and writes go through an in-memory store; every write rewrites the
// snapshot file via a temporary file and a rename.

use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as TokioMutex;

use super::memory::{MemoryStore, Snapshot};
use super::{MessageStore, StoreError};
use crate::models::Message;

pub struct JsonFileStore {
    path: PathBuf,
    memory: MemoryStore,
    write_lock: TokioMutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories. A missing file
    /// starts an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            info!(
                "Loaded {} messages from {}",
                snapshot.messages.len(),
                path.display()
            );
            snapshot
        } else {
            Snapshot::default()
        };

        Ok(Self {
            path,
            memory: MemoryStore::from_snapshot(snapshot),
            write_lock: TokioMutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.memory.snapshot().await;
        let contents = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Flushed {} messages to {}", snapshot.messages.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl MessageStore for JsonFileStore {
    async fn fetch_pending_messages(&self) -> Result<Vec<Message>, StoreError> {
        self.memory.fetch_pending_messages().await
    }

    async fn get_message(
        &self,
        server_id: Option<u64>,
        unique_token: &str,
    ) -> Result<Option<Message>, StoreError> {
        self.memory.get_message(server_id, unique_token).await
    }

    async fn upsert(&self, message: &Message) -> Result<(), StoreError> {
        self.memory.upsert(message).await?;
        self.flush().await
    }

    async fn record_local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
        path: &Path,
    ) -> Result<(), StoreError> {
        self.memory
            .record_local_attachment_path(conversation_id, message_id, path)
            .await?;
        self.flush().await
    }

    async fn local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
    ) -> Result<Option<PathBuf>, StoreError> {
        self.memory.local_attachment_path(conversation_id, message_id).await
    }
}
