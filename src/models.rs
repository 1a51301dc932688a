use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use uuid::Uuid;

const FILE_OPEN_TAG: &str = "[file]";
const FILE_CLOSE_TAG: &str = "[/file]";

/// Delivery state of an outgoing message.
///
/// States are ordered by [`DeliveryState::rank`], not by variant. `Sending` and
/// `Failed` share a rank: both mean "not yet confirmed by the server".
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,  // Queued locally, eligible for automatic resend
    Sending,  // A reconciliation is in flight
    Failed,   // Rejected, waits for the user to retry
    OnQiscus, // Accepted by the server
    OnPusher, // Delivered to the recipient's device
    Read,     // Read by the recipient
}

impl DeliveryState {
    pub fn rank(self) -> u8 {
        match self {
            DeliveryState::Pending => 0,
            DeliveryState::Sending | DeliveryState::Failed => 1,
            DeliveryState::OnQiscus => 2,
            DeliveryState::OnPusher => 3,
            DeliveryState::Read => 4,
        }
    }

    /// Compare two states by delivery progress only.
    pub fn cmp_rank(self, other: DeliveryState) -> Ordering {
        self.rank().cmp(&other.rank())
    }

    pub fn is_confirmed(self) -> bool {
        self.rank() >= DeliveryState::OnQiscus.rank()
    }
}

impl Default for DeliveryState {
    fn default() -> Self {
        DeliveryState::Pending
    }
}

/// Where a message's attachment currently lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Local(PathBuf),
    Remote(String),
}

impl Attachment {
    /// Anything that looks like a URL is already hosted remotely; everything else
    /// is a path on local storage.
    pub fn classify(locator: &str) -> Self {
        if locator.starts_with("http") {
            Attachment::Remote(locator.to_string())
        } else {
            Attachment::Local(PathBuf::from(locator))
        }
    }
}

/// Wrap a remote URI in the textual envelope stored in message bodies.
pub fn file_envelope(uri: &str) -> String {
    format!("{} {} {}", FILE_OPEN_TAG, uri, FILE_CLOSE_TAG)
}

/// Extract the URI from a `[file] <uri> [/file]` body.
pub fn parse_file_envelope(body: &str) -> Option<&str> {
    let body = body.trim();
    let inner = body.strip_prefix(FILE_OPEN_TAG)?.strip_suffix(FILE_CLOSE_TAG)?;
    let uri = inner.trim();
    if uri.is_empty() {
        None
    } else {
        Some(uri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<u64>,              // Server id, absent until confirmed
    pub unique_token: String,         // Client-generated, stable for the message's lifetime
    pub conversation_id: u64,
    pub sender: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,   // Local path or remote URI
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub downloading: bool,            // Upload or forward in flight
    #[serde(default)]
    pub comment_before_id: u64,
    #[serde(default)]
    pub state: DeliveryState,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new_text(conversation_id: u64, sender: &str, body: &str) -> Self {
        Message {
            id: None,
            unique_token: Uuid::new_v4().to_string(),
            conversation_id,
            sender: sender.to_string(),
            body: body.to_string(),
            attachment: None,
            progress: 0,
            downloading: false,
            comment_before_id: 0,
            state: DeliveryState::Pending,
            timestamp: Utc::now(),
        }
    }

    /// A message carrying a file. The body starts out as the file name and is
    /// replaced with the envelope once the upload succeeds.
    pub fn new_attachment(conversation_id: u64, sender: &str, locator: &str) -> Self {
        let name = match Attachment::classify(locator) {
            Attachment::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Attachment::Remote(uri) => file_envelope(&uri),
        };
        let mut message = Self::new_text(conversation_id, sender, &name);
        message.attachment = Some(locator.to_string());
        message
    }

    pub fn is_attachment(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn attachment_kind(&self) -> Option<Attachment> {
        self.attachment.as_deref().map(Attachment::classify)
    }

    /// Remote URL of the attachment, either from the locator or from the body
    /// envelope of a message that has already been uploaded.
    pub fn attachment_url(&self) -> Option<String> {
        if let Some(Attachment::Remote(uri)) = self.attachment_kind() {
            return Some(uri);
        }
        parse_file_envelope(&self.body).map(str::to_string)
    }

    /// Short identity for log lines.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("{}#{}", self.unique_token, id),
            None => self.unique_token.clone(),
        }
    }
}
