//! Per-session mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process lock map keyed by session id
///
/// Mutations of one session run one at a time; different sessions do not
/// contend. Entries nobody holds are pruned on the next acquire.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|id, lock| *id == session_id || Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(session_id).or_default())
        };
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
