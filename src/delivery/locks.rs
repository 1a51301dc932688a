use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

/// One async mutex per message identity, created on first use.
///
/// The map only holds weak references, so a lock disappears once the last
/// guard for it is dropped.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<TokioMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(TokioMutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        debug!("Acquiring reconciliation lock for {}", key);
        lock.lock_owned().await
    }

}

/// Unique tokens with a reconciliation running. Shared by every clone of a
/// reconciler so a message is never resent twice at the same time.
#[derive(Default)]
pub struct InFlight {
    tokens: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Claim `token`, or `None` if another attempt already holds it.
    pub fn claim(self: &Arc<Self>, token: &str) -> Option<Claim> {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if !tokens.insert(token.to_string()) {
            return None;
        }
        Some(Claim {
            set: self.clone(),
            token: token.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Releases its token when dropped.
pub struct Claim {
    set: Arc<InFlight>,
    token: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut tokens = self.set.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&self.token);
    }
}
