// Delivery events published to the UI layer
//
// The core never renders anything: it publishes events through an
// `EventNotifier`. `ChannelNotifier` hands them to a single consumer that
// drains them on its own task, `EventBus` fans them out to any number of
// subscribers.

use async_trait::async_trait;
use log::{debug, error};
use tokio::sync::{broadcast, mpsc};

use crate::delivery::merge::ErrorClass;
use crate::models::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// A resend attempt started (or ended immediately, e.g. missing file).
    ResendStarted(Message),
    /// The server confirmed the message.
    MessageConfirmed(Message),
    /// The attempt failed; `message` carries the merged state.
    SendFailed { message: Message, class: ErrorClass },
}

impl DeliveryEvent {
    pub fn message(&self) -> &Message {
        match self {
            DeliveryEvent::ResendStarted(message) => message,
            DeliveryEvent::MessageConfirmed(message) => message,
            DeliveryEvent::SendFailed { message, .. } => message,
        }
    }
}

#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn publish(&self, event: DeliveryEvent);
}

/// Forwards events into an mpsc channel. The receiver decides on which task
/// (and therefore which thread) events are handled.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<DeliveryEvent>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DeliveryEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventNotifier for ChannelNotifier {
    async fn publish(&self, event: DeliveryEvent) {
        let label = event.message().label();
        match self.tx.send(event).await {
            Ok(_) => debug!("Sent delivery event for {} to receiver", label),
            Err(e) => error!("Failed to send delivery event for {}: {}", label, e),
        }
    }
}

/// Fan-out bus. Publishing never waits; subscribers that fall behind lose the
/// oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventNotifier for EventBus {
    async fn publish(&self, event: DeliveryEvent) {
        // No subscribers is not an error.
        if let Ok(count) = self.tx.send(event) {
            debug!("Delivery event fanned out to {} subscribers", count);
        }
    }
}
