//! Shard management module
//!
//! Discovery, identity and the published registry of session shards.

pub mod client;
pub mod identity;
pub mod info;
mod memory;
mod registry;
pub mod resp;
mod watcher;

pub use client::{ShardClient, ShardConnector};
pub use memory::{MemoryConnector, MemoryShard};
pub use registry::{Registry, ShardInstance, Snapshot};
pub use resp::{RespConnector, RespShardClient};
pub use watcher::{DirectoryWatcher, WatcherHandle, WatcherSettings};
