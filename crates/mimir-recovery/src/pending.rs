use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use mimir_types::{MimirError, OperationId};

/// Completion handle for one recovery operation. Sending consumes it, so it resolves once.
pub type Completion = oneshot::Sender<Result<(), MimirError>>;

/// Operations issued by this node whose trigger write has not been observed yet.
///
/// The only state shared between the submission path and the watch path. Ownership of
/// a handle passes to whoever removes its entry first: the watch handler on a matching
/// event, or the submitter on timeout. The loser finds nothing and does nothing.
#[derive(Default)]
pub struct PendingOperations {
    ops: DashMap<OperationId, Completion>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent. The returned guard drops the entry if it is still present.
    pub fn register(
        &self,
        id: OperationId,
    ) -> Result<(PendingGuard<'_>, oneshot::Receiver<Result<(), MimirError>>), MimirError> {
        match self.ops.entry(id) {
            Entry::Occupied(_) => Err(MimirError::DuplicateOperation(id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok((PendingGuard { ops: self, id }, rx))
            }
        }
    }

    /// Remove-if-present.
    pub fn take(&self, id: &OperationId) -> Option<Completion> {
        self.ops.remove(id).map(|(_, tx)| tx)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ops.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Releases a registry entry on timeout, failed write or a dropped submission future.
pub struct PendingGuard<'a> {
    ops: &'a PendingOperations,
    id: OperationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.ops.take(&self.id);
    }
}
