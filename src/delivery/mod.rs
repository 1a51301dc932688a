// Delivery of pending messages
//
// `DeliveryReconciler` drives a single message to the server and merges the
// outcome into the local store; `PendingMessageScanner` feeds it every message
// the store still considers pending.

use log::{debug, error, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod locks;
pub mod merge;
pub mod scanner;

pub use locks::{InFlight, KeyedLocks};
pub use merge::ErrorClass;
pub use scanner::{Dispatched, PendingMessageScanner};

use crate::events::{DeliveryEvent, EventNotifier};
use crate::models::{file_envelope, Attachment, DeliveryState, Message};
use crate::store::{MessageStore, StoreError};
use crate::transport::{ProgressFn, RemoteTransport, TransportError};
use merge::{failure_target, no_regress, success_target};

/// Limits applied to remote operations. `None` leaves it to the transport.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    pub post_timeout: Option<Duration>,
    pub upload_timeout: Option<Duration>,
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        },
        None => operation.await,
    }
}

/// Resends one message and reconciles the result with the persisted record.
///
/// A message is reconciled by at most one attempt at a time: every entry point
/// claims its unique token first and skips the message if it is already
/// claimed. All read-compare-write sequences against the store run under a lock
/// keyed by the same token, so they also observe writes made by realtime
/// updates. Different messages never wait on each other.
#[derive(Clone)]
pub struct DeliveryReconciler {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn RemoteTransport>,
    notifier: Arc<dyn EventNotifier>,
    locks: Arc<KeyedLocks>,
    in_flight: Arc<InFlight>,
    config: ReconcilerConfig,
}

impl DeliveryReconciler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn RemoteTransport>,
        notifier: Arc<dyn EventNotifier>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            transport,
            notifier,
            locks: Arc::new(KeyedLocks::new()),
            in_flight: Arc::new(InFlight::default()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Number of messages with a reconciliation running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn claim(&self, message: &Message) -> Option<locks::Claim> {
        let claim = self.in_flight.claim(&message.unique_token);
        if claim.is_none() {
            debug!("Message {} is already being resent, skipping", message.label());
        }
        claim
    }

    /// Run [`resend`](Self::resend) on a background task. The message is
    /// claimed before this returns, so a scan started right after it skips it.
    pub fn spawn_resend(&self, message: Message) -> Option<JoinHandle<Message>> {
        let claim = self.claim(&message)?;
        let reconciler = self.clone();
        Some(tokio::spawn(async move {
            let _claim = claim;
            reconciler.reconcile(message).await
        }))
    }

    /// Attempt delivery and return the message as it was finally merged, or
    /// `None` if another attempt on the same message is still running.
    /// Failures end up in the message state, never in an error.
    pub async fn resend(&self, message: Message) -> Option<Message> {
        let _claim = self.claim(&message)?;
        Some(self.reconcile(message).await)
    }

    async fn reconcile(&self, mut message: Message) -> Message {
        message.state = DeliveryState::Sending;

        match message.attachment_kind() {
            None => self.resend_text(message).await,
            Some(Attachment::Remote(_)) => self.forward_file(message).await,
            Some(Attachment::Local(path)) => {
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return self.fail_missing_file(message, &path).await;
                }
                self.upload_file(message, path).await
            }
        }
    }

    async fn resend_text(&self, message: Message) -> Message {
        info!("Resending text message {}", message.label());
        self.notifier
            .publish(DeliveryEvent::ResendStarted(message.clone()))
            .await;
        self.persist_guarded(&message).await;

        match self.post(&message).await {
            Ok(posted) => self.succeed(message, posted).await,
            Err(e) => self.fail(message, e).await,
        }
    }

    async fn upload_file(&self, mut message: Message, path: PathBuf) -> Message {
        info!("Resending attachment {} from {}", message.label(), path.display());
        message.downloading = true;
        message.progress = 0;
        self.persist_guarded(&message).await;
        self.notifier
            .publish(DeliveryEvent::ResendStarted(message.clone()))
            .await;

        // Progress only lives in memory; it is copied back once the upload ends.
        let progress = Arc::new(AtomicU8::new(0));
        let cell = progress.clone();
        let label = message.label();
        let on_progress: ProgressFn = Arc::new(move |percent| {
            cell.store(percent.min(100), Ordering::Relaxed);
            debug!("Upload of {} at {}%", label, percent);
        });

        let uploaded = with_timeout(
            self.config.upload_timeout,
            self.transport.upload_attachment(&path, on_progress),
        )
        .await;
        message.progress = progress.load(Ordering::Relaxed);

        let posted = match uploaded {
            Ok(uri) => {
                debug!("Uploaded {} to {}", message.label(), uri);
                message.body = file_envelope(&uri);
                self.post(&message).await
            }
            Err(e) => Err(e),
        };

        match posted {
            Ok(posted) => {
                if let Some(id) = posted.id {
                    let local = std::path::absolute(&path).unwrap_or(path);
                    if let Err(e) = self
                        .store
                        .record_local_attachment_path(posted.conversation_id, id, &local)
                        .await
                    {
                        error!("Failed to record local path for {}: {}", posted.label(), e);
                    }
                }
                message.downloading = false;
                self.succeed(message, posted).await
            }
            Err(e) => self.fail(message, e).await,
        }
    }

    async fn forward_file(&self, mut message: Message) -> Message {
        info!("Forwarding remote attachment {}", message.label());
        message.downloading = true;
        message.progress = 100;
        self.persist_guarded(&message).await;
        self.notifier
            .publish(DeliveryEvent::ResendStarted(message.clone()))
            .await;

        match self.post(&message).await {
            Ok(posted) => {
                message.downloading = false;
                self.succeed(message, posted).await
            }
            Err(e) => self.fail(message, e).await,
        }
    }

    async fn fail_missing_file(&self, mut message: Message, path: &Path) -> Message {
        warn!(
            "Attachment {} of message {} no longer exists, marking failed",
            path.display(),
            message.label()
        );
        let class = ErrorClass::LocalResource;
        self.merge_failure(&mut message, class).await;
        self.notifier
            .publish(DeliveryEvent::ResendStarted(message.clone()))
            .await;
        self.notifier
            .publish(DeliveryEvent::SendFailed {
                message: message.clone(),
                class,
            })
            .await;
        message
    }

    async fn post(&self, message: &Message) -> Result<Message, TransportError> {
        with_timeout(self.config.post_timeout, self.transport.post_message(message)).await
    }

    /// Write `message` unless the stored copy already ranks higher. Returns the
    /// state that is in the store afterwards.
    async fn persist_guarded(&self, message: &Message) -> DeliveryState {
        let _guard = self.locks.lock(&message.unique_token).await;
        let persisted = match self.store.get_message(message.id, &message.unique_token).await {
            Ok(persisted) => persisted.map(|m| m.state),
            Err(e) => {
                error!("Failed to read stored copy of {}: {}", message.label(), e);
                return message.state;
            }
        };

        let state = no_regress(persisted, message.state);
        if state != message.state {
            debug!(
                "Stored copy of {} is already {:?}, not writing {:?}",
                message.label(),
                state,
                message.state
            );
            return state;
        }
        if let Err(e) = self.store.upsert(message).await {
            error!("Failed to store message {}: {}", message.label(), e);
        }
        state
    }

    /// Merge a server-accepted message into the store.
    async fn succeed(&self, local: Message, posted: Message) -> Message {
        let mut merged = posted;
        merged.unique_token = local.unique_token;
        merged.attachment = local.attachment;
        merged.progress = local.progress;
        merged.downloading = false;

        {
            let _guard = self.locks.lock(&merged.unique_token).await;
            match self.read_persisted(&merged).await {
                Ok(persisted) => {
                    merged.state = success_target(persisted, DeliveryState::OnQiscus);
                    if let Err(e) = self.store.upsert(&merged).await {
                        error!("Failed to store confirmed message {}: {}", merged.label(), e);
                    }
                }
                Err(e) => {
                    // Without the stored copy a write could lower its rank.
                    warn!(
                        "Failed to read stored copy of {}, it stays pending and may be posted again: {}",
                        merged.label(),
                        e
                    );
                    merged.state = DeliveryState::OnQiscus;
                }
            }
        }

        info!("Message {} confirmed as {:?}", merged.label(), merged.state);
        self.notifier
            .publish(DeliveryEvent::MessageConfirmed(merged.clone()))
            .await;
        merged
    }

    /// Persisted state of `message`, reading the store a second time if the
    /// first read fails.
    async fn read_persisted(&self, message: &Message) -> Result<Option<DeliveryState>, StoreError> {
        match self.store.get_message(message.id, &message.unique_token).await {
            Ok(persisted) => Ok(persisted.map(|m| m.state)),
            Err(e) => {
                debug!("Retrying read of {} after: {}", message.label(), e);
                let persisted = self.store.get_message(message.id, &message.unique_token).await?;
                Ok(persisted.map(|m| m.state))
            }
        }
    }

    async fn fail(&self, mut message: Message, error: TransportError) -> Message {
        let class = ErrorClass::from_transport(&error);
        if class.is_retryable() {
            warn!("Failed to send message {}, will retry: {}", message.label(), error);
        } else {
            warn!("Message {} failed permanently ({:?}): {}", message.label(), class, error);
        }
        self.merge_failure(&mut message, class).await;
        self.notifier
            .publish(DeliveryEvent::SendFailed {
                message: message.clone(),
                class,
            })
            .await;
        message
    }

    async fn merge_failure(&self, message: &mut Message, class: ErrorClass) {
        if !class.is_retryable() {
            message.downloading = false;
        }
        let target = class.target_state();
        message.state = target;

        let _guard = self.locks.lock(&message.unique_token).await;
        match self.store.get_message(message.id, &message.unique_token).await {
            Ok(persisted) => {
                let merge = failure_target(persisted.map(|m| m.state), target);
                message.state = merge.state;
                if merge.write {
                    if let Err(e) = self.store.upsert(message).await {
                        error!("Failed to store failed message {}: {}", message.label(), e);
                    }
                } else {
                    debug!(
                        "Keeping stored state {:?} of {} over {:?}",
                        merge.state,
                        message.label(),
                        target
                    );
                }
            }
            Err(e) => error!("Failed to read stored copy of {}: {}", message.label(), e),
        }
    }
}
