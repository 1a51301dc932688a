// Remote side of message delivery: posting message bodies and uploading files.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::Message;

pub mod http;

pub use http::HttpTransport;

/// Upload progress callback, called with a percentage in 0..=100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The server answered with an error status.
    #[error("Server responded with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP-style status code, when the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Submit a message. The returned copy carries the server id and state.
    async fn post_message(&self, message: &Message) -> Result<Message, TransportError>;

    /// Upload a local file and return its remote URI.
    async fn upload_attachment(
        &self,
        file: &Path,
        on_progress: ProgressFn,
    ) -> Result<String, TransportError>;
}
