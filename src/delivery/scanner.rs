use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::DeliveryReconciler;
use crate::models::Message;
use crate::store::MessageStore;

/// Reconciliations started by one scan. Dropping it leaves them running.
#[derive(Default)]
pub struct Dispatched {
    handles: Vec<JoinHandle<Message>>,
}

impl Dispatched {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every dispatched reconciliation. Tasks that panicked are logged
    /// and left out.
    pub async fn join(self) -> Vec<Message> {
        let mut finished = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(message) => finished.push(message),
                Err(e) => error!("Resend task failed: {}", e),
            }
        }
        finished
    }
}

/// Finds messages the store still considers pending and resends each of them
/// on its own task.
pub struct PendingMessageScanner {
    store: Arc<dyn MessageStore>,
    reconciler: DeliveryReconciler,
}

impl PendingMessageScanner {
    pub fn new(reconciler: DeliveryReconciler) -> Self {
        Self {
            store: reconciler.store().clone(),
            reconciler,
        }
    }

    /// Number of messages currently being reconciled, from any caller.
    pub fn in_flight(&self) -> usize {
        self.reconciler.in_flight()
    }

    /// Dispatch a resend for every pending message and return once all of them
    /// are spawned. Outcomes are only visible through the store and the events.
    pub async fn scan_and_resend(&self) -> Dispatched {
        let pending = match self.store.fetch_pending_messages().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to fetch pending messages: {}", e);
                return Dispatched::default();
            }
        };

        // Messages still owned by an earlier scan or a user send are skipped.
        let handles: Vec<_> = pending
            .into_iter()
            .filter_map(|message| self.reconciler.spawn_resend(message))
            .collect();

        if !handles.is_empty() {
            info!("Dispatched resend of {} pending messages", handles.len());
        }
        Dispatched { handles }
    }

    /// Scan every `interval` until `shutdown` fires or its sender is dropped.
    pub async fn run(&self, interval: Duration, mut shutdown: mpsc::Receiver<()>) {
        info!("Pending message scanner started, interval {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_and_resend().await;
                }
                _ = shutdown.recv() => {
                    info!("Pending message scanner shutting down");
                    break;
                }
            }
        }
    }
}
