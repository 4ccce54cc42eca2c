use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use mimir_types::{MimirError, Revision};

use crate::types::{Entry, WatchEvent, WatchId};

/// Receives ordered updates for a watched key.
///
/// The metastore awaits the returned future before delivering the next revision to the
/// same listener, so a listener observes its events strictly in commit order. An `Err`
/// is logged by the metastore and never stops delivery.
pub trait WatchListener: Send + Sync + 'static {
    fn on_update(&self, event: WatchEvent) -> BoxFuture<'static, Result<(), MimirError>>;
}

/// Linearizable key-value log consumed by the recovery coordinator.
///
/// Methods use RPITIT (`-> impl Future + Send`) so generic callers can `.await` across
/// thread boundaries without an `async-trait` dependency.
pub trait MetaStorage: Send + Sync + 'static {
    /// Create-or-overwrite `key`. Resolves with the commit revision of this write.
    fn put(&self, key: &[u8], value: Vec<u8>)
        -> impl Future<Output = Result<Revision, MimirError>> + Send;

    fn get(&self, key: &[u8])
        -> impl Future<Output = Result<Option<Entry>, MimirError>> + Send;

    /// Latest committed revision, `0` for an empty store.
    fn revision(&self) -> impl Future<Output = Result<Revision, MimirError>> + Send;

    /// Deliver every future put on exactly `key` to `listener`, the writer included.
    fn register_exact_watch(&self, key: &[u8], listener: Arc<dyn WatchListener>)
        -> impl Future<Output = Result<WatchId, MimirError>> + Send;

    /// Stop delivery. Events already queued for the listener are still drained.
    fn unregister_watch(&self, id: WatchId)
        -> impl Future<Output = Result<(), MimirError>> + Send;
}
