// REST transport for the chat backend
//
// Posts go to `post_comment` as JSON, uploads go to `upload` as a streamed
// multipart body so progress can be reported per chunk.

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::{ProgressFn, RemoteTransport, TransportError};
use crate::config::Settings;
use crate::models::{DeliveryState, Message};

const POST_COMMENT_PATH: &str = "api/v2/mobile/post_comment";
const UPLOAD_PATH: &str = "api/v2/mobile/upload";
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Serialize)]
struct PostCommentRequest<'a> {
    token: &'a str,
    comment: &'a str,
    topic_id: u64,
    unique_temp_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct PostCommentResponse {
    results: PostCommentResults,
}

#[derive(Deserialize)]
struct PostCommentResults {
    comment: CommentPayload,
}

#[derive(Deserialize)]
struct CommentPayload {
    id: u64,
    #[serde(default)]
    comment_before_id: u64,
    message: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    results: UploadResults,
}

#[derive(Deserialize)]
struct UploadResults {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct UploadedFile {
    url: String,
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
    app_id: String,
    token: String,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            app_id: settings.app_id.clone(),
            token: settings.token.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn a non-success response into a `Status` error.
    async fn check_status(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            code: status.as_u16(),
            message,
        })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return TransportError::Status {
                code: status.as_u16(),
                message: e.to_string(),
            };
        }
        if e.is_decode() {
            return TransportError::Decode(e.to_string());
        }
        TransportError::Network(e.to_string())
    }
}

fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn post_message(&self, message: &Message) -> Result<Message, TransportError> {
        let kind = if message.is_attachment() { "file_attachment" } else { "text" };
        let request = PostCommentRequest {
            token: &self.token,
            comment: &message.body,
            topic_id: message.conversation_id,
            unique_temp_id: &message.unique_token,
            kind,
        };

        debug!("Posting message {} to conversation {}", message.label(), message.conversation_id);
        let response = self
            .client
            .post(self.endpoint(POST_COMMENT_PATH))
            .header("QISCUS_SDK_APP_ID", &self.app_id)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let payload: PostCommentResponse = response.json().await?;

        let mut posted = message.clone();
        posted.id = Some(payload.results.comment.id);
        posted.comment_before_id = payload.results.comment.comment_before_id;
        posted.body = payload.results.comment.message;
        posted.state = DeliveryState::OnQiscus;
        info!("Message {} accepted by server", posted.label());
        Ok(posted)
    }

    async fn upload_attachment(
        &self,
        file: &Path,
        on_progress: ProgressFn,
    ) -> Result<String, TransportError> {
        let handle = tokio::fs::File::open(file).await?;
        let total = handle.metadata().await?.len();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        // Stream the file in chunks, reporting progress as each one is handed
        // to the HTTP client. After a read error the stream ends.
        let chunks = futures_util::stream::unfold(
            (Some(handle), 0u64),
            move |(handle, sent)| {
                let on_progress = on_progress.clone();
                async move {
                    let mut handle = handle?;
                    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
                    match handle.read(&mut buf).await {
                        Ok(0) => None,
                        Ok(n) => {
                            buf.truncate(n);
                            let sent = sent + n as u64;
                            on_progress(percent(sent, total));
                            Some((Ok::<Vec<u8>, std::io::Error>(buf), (Some(handle), sent)))
                        }
                        Err(e) => Some((Err(e), (None, sent))),
                    }
                }
            },
        );

        let part = Part::stream_with_length(Body::wrap_stream(chunks), total).file_name(file_name);
        let form = Form::new().text("token", self.token.clone()).part("file", part);

        debug!("Uploading {} ({} bytes)", file.display(), total);
        let response = self
            .client
            .post(self.endpoint(UPLOAD_PATH))
            .header("QISCUS_SDK_APP_ID", &self.app_id)
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let payload: UploadResponse = response.json().await?;

        if payload.results.file.url.is_empty() {
            warn!("Upload of {} returned an empty url", file.display());
            return Err(TransportError::Decode("empty file url".to_string()));
        }
        Ok(payload.results.file.url)
    }
}
