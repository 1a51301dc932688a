// Delivery core of the chat client: resending pending messages and reconciling
// their delivery state with the local store.

pub mod config;
pub mod delivery;
pub mod events;
pub mod models;
pub mod presenter;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use delivery::{DeliveryReconciler, PendingMessageScanner, ReconcilerConfig};
pub use events::{DeliveryEvent, EventNotifier};
pub use models::*;
pub use store::MessageStore;
pub use transport::RemoteTransport;
