use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_mutex::{Mutex, MutexGuardArc};

type Key = (String, String);

/// In-process locks keyed by `(track_id, session_id)`.
///
/// Holding a key's guard serializes classify + persist for plays of
/// the same track from the same session, closing the window where
/// two concurrent plays both pass the duplicate check. Entries are
/// dropped once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<StdMutex<HashMap<Key, Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, track_id: &str, session_id: &str) -> KeyGuard {
        let key = (track_id.to_string(), session_id.to_string());
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.clone()).or_default().clone()
        };
        let guard = entry.lock_arc().await;
        KeyGuard {
            key,
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &Key) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let idle = map
            .get(key)
            .map(|entry| Arc::strong_count(entry) == 1)
            .unwrap_or(false);
        if idle {
            map.remove(key);
        }
    }
}

pub struct KeyGuard {
    key: Key,
    locks: KeyLocks,
    guard: Option<MutexGuardArc<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // unlock before checking whether the entry can go
        self.guard.take();
        self.locks.release(&self.key);
    }
}
