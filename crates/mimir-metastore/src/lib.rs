pub mod mem;
pub mod traits;
pub mod types;

pub use mem::MemMetaStorage;
pub use traits::{MetaStorage, WatchListener};
pub use types::{Entry, WatchEvent, WatchId};
