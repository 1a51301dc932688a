// Local message persistence
//
// The delivery core only depends on the `MessageStore` contract. Two reference
// stores ship with the crate: an in-memory map and a JSON snapshot file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Message;

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages that still need to reach the server, oldest first. What counts as
    /// pending is up to the store.
    async fn fetch_pending_messages(&self) -> Result<Vec<Message>, StoreError>;

    /// Find a message by server id or by unique token, whichever matches.
    async fn get_message(
        &self,
        server_id: Option<u64>,
        unique_token: &str,
    ) -> Result<Option<Message>, StoreError>;

    async fn upsert(&self, message: &Message) -> Result<(), StoreError>;

    /// Remember which local file a confirmed attachment was uploaded from.
    async fn record_local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
        path: &Path,
    ) -> Result<(), StoreError>;

    async fn local_attachment_path(
        &self,
        conversation_id: u64,
        message_id: u64,
    ) -> Result<Option<PathBuf>, StoreError>;
}
