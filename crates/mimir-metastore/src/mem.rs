use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use mimir_types::{MimirError, Revision};

use crate::traits::{MetaStorage, WatchListener};
use crate::types::{Entry, WatchEvent, WatchId};

struct Watch {
    id: WatchId,
    key: Vec<u8>,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct MemInner {
    data: BTreeMap<Vec<u8>, Entry>,
    revision: Revision,
    watches: Vec<Watch>,
    next_watch_id: u64,
}

/// In-memory `MetaStorage` with a single global revision counter.
///
/// Each registered listener gets its own delivery task fed through an unbounded
/// channel. Events are enqueued while the write lock is held, so every listener sees
/// revisions in commit order and a put never waits on a listener.
///
/// Intended for tests and single-process nodes; not replicated, not persisted.
pub struct MemMetaStorage {
    inner: Arc<RwLock<MemInner>>,
}

impl MemMetaStorage {
    pub fn new() -> Self {
        MemMetaStorage {
            inner: Arc::new(RwLock::new(MemInner {
                data: BTreeMap::new(),
                revision: 0,
                watches: Vec::new(),
                next_watch_id: 1,
            })),
        }
    }
}

impl Default for MemMetaStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaStorage for MemMetaStorage {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Revision, MimirError> {
        let mut g = self.inner.write().await;
        g.revision += 1;
        let revision = g.revision;
        let entry = Entry { key: key.to_vec(), value, revision };
        g.data.insert(entry.key.clone(), entry.clone());

        // Closed senders belong to listeners whose task is gone; skipping them is fine.
        for watch in g.watches.iter().filter(|w| w.key == key) {
            let _ = watch.tx.send(WatchEvent { revision, entry: entry.clone() });
        }
        Ok(revision)
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Entry>, MimirError> {
        Ok(self.inner.read().await.data.get(key).cloned())
    }

    async fn revision(&self) -> Result<Revision, MimirError> {
        Ok(self.inner.read().await.revision)
    }

    async fn register_exact_watch(
        &self,
        key: &[u8],
        listener: Arc<dyn WatchListener>,
    ) -> Result<WatchId, MimirError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();
        let mut g = self.inner.write().await;
        let id = WatchId(g.next_watch_id);
        g.next_watch_id += 1;
        g.watches.push(Watch { id, key: key.to_vec(), tx });

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let revision = event.revision;
                if let Err(e) = listener.on_update(event).await {
                    tracing::warn!(revision, error = %e, "watch listener failed");
                }
            }
            tracing::debug!(watch_id = id.0, "watch delivery stopped");
        });
        Ok(id)
    }

    async fn unregister_watch(&self, id: WatchId) -> Result<(), MimirError> {
        self.inner.write().await.watches.retain(|w| w.id != id);
        Ok(())
    }
}
