// Common test utilities for integration tests
// Scripted transport, recording notifier and a few helpers shared by every test file
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, LevelFilter};
use tokio::time::timeout;

use chatsend::delivery::{DeliveryReconciler, ReconcilerConfig};
use chatsend::events::{DeliveryEvent, EventNotifier};
use chatsend::models::{DeliveryState, Message};
use chatsend::store::MemoryStore;
use chatsend::transport::{ProgressFn, RemoteTransport, TransportError};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// What the scripted transport does for one call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Status(u16),
    NetworkDown,
    /// Never answers; only useful with a timeout configured.
    Hang,
    Delayed(Duration, Box<Outcome>),
}

impl Outcome {
    pub fn delayed(millis: u64, outcome: Outcome) -> Self {
        Outcome::Delayed(Duration::from_millis(millis), Box::new(outcome))
    }
}

async fn settle(outcome: Outcome) -> Result<(), TransportError> {
    let mut outcome = outcome;
    loop {
        match outcome {
            Outcome::Accept => return Ok(()),
            Outcome::Status(code) => {
                return Err(TransportError::Status {
                    code,
                    message: "rejected by test server".to_string(),
                })
            }
            Outcome::NetworkDown => {
                return Err(TransportError::Network("connection refused".to_string()))
            }
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
            Outcome::Delayed(delay, next) => {
                tokio::time::sleep(delay).await;
                outcome = *next;
            }
        }
    }
}

/// Transport that answers from a script instead of a server.
///
/// Post outcomes are looked up by message body first, then taken from the
/// queue in call order; with nothing scripted the post is accepted.
#[derive(Default)]
pub struct ScriptedTransport {
    post_by_body: Mutex<HashMap<String, Outcome>>,
    post_queue: Mutex<VecDeque<Outcome>>,
    upload_queue: Mutex<VecDeque<Outcome>>,
    next_id: AtomicU64,
    pub posts: Mutex<Vec<Message>>,
    pub uploads: Mutex<Vec<PathBuf>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        })
    }

    pub fn on_body(&self, body: &str, outcome: Outcome) {
        self.post_by_body.lock().unwrap().insert(body.to_string(), outcome);
    }

    pub fn queue_post(&self, outcome: Outcome) {
        self.post_queue.lock().unwrap().push_back(outcome);
    }

    pub fn queue_upload(&self, outcome: Outcome) {
        self.upload_queue.lock().unwrap().push_back(outcome);
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn post_message(&self, message: &Message) -> Result<Message, TransportError> {
        self.posts.lock().unwrap().push(message.clone());
        let outcome = {
            let by_body = self.post_by_body.lock().unwrap().get(&message.body).cloned();
            by_body
                .or_else(|| self.post_queue.lock().unwrap().pop_front())
                .unwrap_or(Outcome::Accept)
        };
        settle(outcome).await?;

        let mut posted = message.clone();
        posted.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        posted.state = DeliveryState::OnQiscus;
        Ok(posted)
    }

    async fn upload_attachment(
        &self,
        file: &Path,
        on_progress: ProgressFn,
    ) -> Result<String, TransportError> {
        self.uploads.lock().unwrap().push(file.to_path_buf());
        let outcome = self
            .upload_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);
        on_progress(50);
        settle(outcome).await?;
        on_progress(100);

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("https://files.example.com/{}", name))
    }
}

/// Notifier that keeps every event it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn publish(&self, event: DeliveryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub reconciler: DeliveryReconciler,
}

pub fn harness() -> Harness {
    harness_with_config(ReconcilerConfig::default())
}

pub fn harness_with_config(config: ReconcilerConfig) -> Harness {
    setup_logging();
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new();
    let notifier = RecordingNotifier::new();
    let reconciler =
        DeliveryReconciler::new(store.clone(), transport.clone(), notifier.clone(), config);
    Harness {
        store,
        transport,
        notifier,
        reconciler,
    }
}

/// Wait for a delivery event matching the predicate with timeout
pub async fn wait_for_event(
    rx: &mut tokio::sync::mpsc::Receiver<DeliveryEvent>,
    predicate: impl Fn(&DeliveryEvent) -> bool,
    timeout_secs: u64,
) -> Result<DeliveryEvent> {
    info!("Waiting for delivery event...");
    match timeout(Duration::from_secs(timeout_secs), async {
        while let Some(event) = rx.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        Err(anyhow::anyhow!("Event receiver closed"))
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Timed out waiting for delivery event")),
    }
}
