//! flowindex-sync: block fetcher, persister, event dispatcher and sync loop.

pub mod bootstrap;
pub mod builder;
pub mod dispatcher;
pub mod fetcher;
pub mod persister;
pub mod storage;
pub mod sync_loop;
pub mod watcher;

pub use builder::SyncLoopBuilder;
pub use dispatcher::EventDispatcher;
pub use fetcher::{BlockData, BlockFetcher, FetchedTransaction};
pub use persister::{EntityPersister, PersistReport};
pub use storage::{FullStorageReindexer, StorageReindexer};
pub use sync_loop::{SkipReason, SyncLoop, TickReport};
pub use watcher::WatcherRegistry;
