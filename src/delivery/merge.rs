//! Rank arithmetic for merging a delivery outcome into the persisted record.
//!
//! Every function here takes the persisted state (if any) and returns the state
//! to keep. None of them ever returns a state ranked below the persisted one.

use crate::models::DeliveryState;
use crate::transport::TransportError;

/// How a failed attempt is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The attachment is gone from local storage. Not retried.
    LocalResource,
    /// Network trouble or a timeout. Retried on the next scan.
    Transient,
    /// The server refused the message with this status. Needs the user.
    Rejected(u16),
}

impl ErrorClass {
    pub fn from_transport(error: &TransportError) -> Self {
        match error.status() {
            Some(code) if code >= 400 => ErrorClass::Rejected(code),
            _ => ErrorClass::Transient,
        }
    }

    pub fn target_state(self) -> DeliveryState {
        match self {
            ErrorClass::Transient => DeliveryState::Pending,
            ErrorClass::LocalResource | ErrorClass::Rejected(_) => DeliveryState::Failed,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// State to persist after the server accepted a message as `incoming`
/// (normally `OnQiscus`). A realtime update may already have moved it further.
pub fn success_target(persisted: Option<DeliveryState>, incoming: DeliveryState) -> DeliveryState {
    match persisted {
        Some(state) if state.rank() > incoming.rank() => state,
        _ => incoming,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureMerge {
    pub state: DeliveryState,
    /// Whether the store needs a write.
    pub write: bool,
}

/// State to keep after a failed attempt aiming for `target`.
///
/// A persisted `Sending` is the in-flight marker of an attempt, so a `Failed`
/// target replaces it even though both share a rank.
pub fn failure_target(persisted: Option<DeliveryState>, target: DeliveryState) -> FailureMerge {
    match persisted {
        None => FailureMerge { state: target, write: true },
        Some(state) if state.rank() < target.rank() => FailureMerge { state: target, write: true },
        Some(DeliveryState::Sending) if target == DeliveryState::Failed => FailureMerge {
            state: target,
            write: true,
        },
        Some(state) => FailureMerge { state, write: false },
    }
}

/// State for a plain write (in-flight marker, missing file) that must not
/// lower the persisted rank.
pub fn no_regress(persisted: Option<DeliveryState>, incoming: DeliveryState) -> DeliveryState {
    match persisted {
        Some(state) if state.rank() > incoming.rank() => state,
        _ => incoming,
    }
}
