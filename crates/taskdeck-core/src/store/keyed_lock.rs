use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async lock per key, created on demand and dropped once nobody holds
/// or waits for it. Callers for the same key queue up in FIFO order.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: LockTable,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = {
            let mut table = self.table.lock();
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            table: self.table.clone(),
        }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: LockTable,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the table and waiters
        drop(self.guard.take());

        let mut table = self.table.lock();
        let idle = table
            .get(&self.key)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            table.remove(&self.key);
        }
    }
}
