//! UI-facing side of a single conversation.
//!
//! A screen implements [`ChatView`] and talks to the core only through
//! [`ChatPresenter`]: it asks the presenter to send or resend messages and gets
//! called back with every delivery change for its conversation.

use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::delivery::DeliveryReconciler;
use crate::events::DeliveryEvent;
use crate::models::{Attachment, DeliveryState, Message};

pub trait ChatView: Send + Sync {
    /// A new outgoing message was created.
    fn on_sending_message(&self, message: &Message);
    fn on_success_send_message(&self, message: &Message);
    fn on_failed_send_message(&self, message: &Message);
    /// A message changed without reaching a final outcome (e.g. a resend began).
    fn refresh_message(&self, message: &Message);
    fn show_error(&self, error: &str);
}

pub struct ChatPresenter {
    conversation_id: u64,
    sender: String,
    reconciler: DeliveryReconciler,
    view: Arc<dyn ChatView>,
}

impl ChatPresenter {
    pub fn new(
        conversation_id: u64,
        sender: &str,
        reconciler: DeliveryReconciler,
        view: Arc<dyn ChatView>,
    ) -> Self {
        Self {
            conversation_id,
            sender: sender.to_string(),
            reconciler,
            view,
        }
    }

    /// Queue a text message. Blank input is ignored.
    pub async fn send_text(&self, body: &str) -> Option<JoinHandle<Message>> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        let message = Message::new_text(self.conversation_id, &self.sender, body);
        self.submit(message).await
    }

    /// Queue a file message. A file that cannot be found is reported to the view.
    pub async fn send_file(&self, path: &Path) -> Option<JoinHandle<Message>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            self.view.show_error(&format!("Failed to read file {}", path.display()));
            return None;
        }
        let locator = path.to_string_lossy();
        let message = Message::new_attachment(self.conversation_id, &self.sender, &locator);
        self.submit(message).await
    }

    /// Retry a message the user tapped. Only failed messages are retried; the
    /// rest are picked up by the scanner or are already delivered. Returns
    /// `None` as well when the message is already being resent.
    pub fn resend(&self, message: Message) -> Option<JoinHandle<Message>> {
        if message.state != DeliveryState::Failed {
            debug!("Ignoring resend of {} in state {:?}", message.label(), message.state);
            return None;
        }
        info!("User requested resend of {}", message.label());
        self.reconciler.spawn_resend(message)
    }

    /// Where to open the attachment of a delivered message the user tapped:
    /// the file it was uploaded from if that is still on disk, otherwise the
    /// remote URL to download. `None` for text and undelivered messages.
    pub async fn open_attachment(&self, message: &Message) -> Option<Attachment> {
        if !message.state.is_confirmed() {
            return None;
        }
        let url = message.attachment_url()?;

        if let Some(id) = message.id {
            match self
                .reconciler
                .store()
                .local_attachment_path(message.conversation_id, id)
                .await
            {
                Ok(Some(path)) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                    debug!("Opening {} from {}", message.label(), path.display());
                    return Some(Attachment::Local(path));
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to look up local copy of {}: {}", message.label(), e),
            }
        }
        debug!("Downloading {} from {}", message.label(), url);
        Some(Attachment::Remote(url))
    }

    async fn submit(&self, message: Message) -> Option<JoinHandle<Message>> {
        if let Err(e) = self.reconciler.store().upsert(&message).await {
            warn!("Failed to store outgoing message {}: {}", message.label(), e);
        }
        self.view.on_sending_message(&message);
        self.reconciler.spawn_resend(message)
    }

    /// Forward delivery events for this conversation to the view until the bus
    /// closes. Runs on whichever task the caller drives it from.
    pub async fn attach(&self, mut events: broadcast::Receiver<DeliveryEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.dispatch(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Chat view for {} missed {} delivery events", self.conversation_id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Event bus closed, detaching view for {}", self.conversation_id);
    }

    /// Route one event to the view, if it belongs to this conversation.
    pub fn dispatch(&self, event: &DeliveryEvent) {
        if event.message().conversation_id != self.conversation_id {
            return;
        }
        match event {
            DeliveryEvent::ResendStarted(message) => self.view.refresh_message(message),
            DeliveryEvent::MessageConfirmed(message) => self.view.on_success_send_message(message),
            DeliveryEvent::SendFailed { message, .. } => self.view.on_failed_send_message(message),
        }
    }
}
