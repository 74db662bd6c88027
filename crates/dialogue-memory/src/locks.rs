use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock registry keyed by origin.
///
/// The registry lock is held only for lookup/insert/removal, never while the
/// origin lock is awaited. Entries live only while someone holds or waits on
/// them: callers hand their guard back through [`OriginLocks::release`].
#[derive(Default)]
pub struct OriginLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OriginLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `origin`.
    pub async fn acquire(&self, origin: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Unlock `origin` and forget its entry unless another caller is queued.
    ///
    /// Waiters clone the entry under the registry lock, so a strong count of
    /// one here means nobody else can reach it.
    pub async fn release(&self, origin: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);

        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(origin) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(origin);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
