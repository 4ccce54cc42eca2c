use mimir_types::Revision;

/// A key as stored in the metastore, stamped with the revision of the put that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub revision: Revision,
}

/// One notification per successful put on a watched key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub revision: Revision,
    pub entry: Entry,
}

/// Handle returned by `register_exact_watch`; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);
