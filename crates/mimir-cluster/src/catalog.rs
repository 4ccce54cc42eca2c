use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use mimir_types::{CatalogVersion, MimirError, TableId, ZoneId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDescriptor {
    pub id: ZoneId,
    pub name: String,
    pub partitions: u32,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub id: TableId,
    pub name: String,
    pub zone_id: ZoneId,
}

/// Full catalog contents as of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub version: CatalogVersion,
    pub zones: Vec<ZoneDescriptor>,
    pub tables: Vec<TableDescriptor>,
}

impl CatalogSnapshot {
    pub fn new(version: CatalogVersion) -> Self {
        CatalogSnapshot { version, zones: Vec::new(), tables: Vec::new() }
    }

    pub fn with_zone(mut self, id: ZoneId, name: &str, partitions: u32, replicas: u32) -> Self {
        self.zones.push(ZoneDescriptor { id, name: name.to_string(), partitions, replicas });
        self
    }

    pub fn with_table(mut self, id: TableId, name: &str, zone_id: ZoneId) -> Self {
        self.tables.push(TableDescriptor { id, name: name.to_string(), zone_id });
        self
    }
}

/// Read side of the versioned catalog.
///
/// Lookups at `version` see the newest snapshot whose version is `<= version`.
pub trait CatalogService: Send + Sync + 'static {
    /// Newest version known to this node.
    fn latest_version(&self) -> CatalogVersion;

    fn zones(&self, version: CatalogVersion) -> Vec<ZoneDescriptor>;

    fn zone(&self, zone_id: ZoneId, version: CatalogVersion) -> Option<ZoneDescriptor> {
        self.zones(version).into_iter().find(|z| z.id == zone_id)
    }

    fn table(&self, table_id: TableId, version: CatalogVersion) -> Option<TableDescriptor>;

    /// Tracks which version has been applied locally.
    fn version_tracker(&self) -> &VersionTracker;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tracked {
    At(CatalogVersion),
    Closed,
}

/// Monotonic "applied up to" marker with async waiters.
///
/// `wait_for(v)` resolves as soon as the tracked value reaches `v`. Every waiter, pending
/// or future, fails with `TrackerClosed` once the tracker is closed.
pub struct VersionTracker {
    tx: watch::Sender<Tracked>,
}

impl VersionTracker {
    pub fn new(initial: CatalogVersion) -> Self {
        let (tx, _rx) = watch::channel(Tracked::At(initial));
        VersionTracker { tx }
    }

    pub fn current(&self) -> Result<CatalogVersion, MimirError> {
        match *self.tx.borrow() {
            Tracked::At(v) => Ok(v),
            Tracked::Closed => Err(MimirError::TrackerClosed),
        }
    }

    /// Advances the tracker. Lower values are ignored.
    pub fn update(&self, version: CatalogVersion) -> Result<(), MimirError> {
        let mut closed = false;
        self.tx.send_if_modified(|t| match t {
            Tracked::At(v) if version > *v => {
                *v = version;
                true
            }
            Tracked::At(_) => false,
            Tracked::Closed => {
                closed = true;
                false
            }
        });
        if closed {
            Err(MimirError::TrackerClosed)
        } else {
            Ok(())
        }
    }

    pub fn wait_for(
        &self,
        version: CatalogVersion,
    ) -> impl Future<Output = Result<(), MimirError>> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let closed = matches!(
                *rx.wait_for(|t| match t {
                    Tracked::At(v) => *v >= version,
                    Tracked::Closed => true,
                })
                .await
                .map_err(|_| MimirError::TrackerClosed)?,
                Tracked::Closed
            );
            if closed {
                Err(MimirError::TrackerClosed)
            } else {
                Ok(())
            }
        }
    }

    pub fn close(&self) {
        self.tx.send_replace(Tracked::Closed);
    }
}

/// In-memory catalog: every published snapshot is immediately applied locally.
pub struct MemCatalog {
    snapshots: ArcSwap<BTreeMap<CatalogVersion, Arc<CatalogSnapshot>>>,
    tracker: VersionTracker,
}

impl MemCatalog {
    pub fn new() -> Self {
        MemCatalog {
            snapshots: ArcSwap::from_pointee(BTreeMap::new()),
            tracker: VersionTracker::new(0),
        }
    }

    pub fn publish(&self, snapshot: CatalogSnapshot) -> Result<(), MimirError> {
        let version = snapshot.version;
        let snapshot = Arc::new(snapshot);
        self.snapshots.rcu(|cur| {
            let mut next = BTreeMap::clone(cur);
            next.insert(version, snapshot.clone());
            next
        });
        tracing::debug!(version, "catalog version applied");
        self.tracker.update(version)
    }

    fn at(&self, version: CatalogVersion) -> Option<Arc<CatalogSnapshot>> {
        self.snapshots.load().range(..=version).next_back().map(|(_, s)| s.clone())
    }
}

impl Default for MemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogService for MemCatalog {
    fn latest_version(&self) -> CatalogVersion {
        self.snapshots.load().keys().next_back().copied().unwrap_or(0)
    }

    fn zones(&self, version: CatalogVersion) -> Vec<ZoneDescriptor> {
        self.at(version).map(|s| s.zones.clone()).unwrap_or_default()
    }

    fn table(&self, table_id: TableId, version: CatalogVersion) -> Option<TableDescriptor> {
        self.at(version)?.tables.iter().find(|t| t.id == table_id).cloned()
    }

    fn version_tracker(&self) -> &VersionTracker {
        &self.tracker
    }
}
