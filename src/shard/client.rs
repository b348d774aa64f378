//! Shard client seam
//!
//! Every key-value backend is reached through [`ShardClient`]. Handles are
//! shared between the watcher and in-flight requests, so implementations
//! must be safe for concurrent use.

use crate::error::SessiaError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Handle to one key-value shard
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Network address this handle talks to
    fn address(&self) -> &str;

    /// Read a key; `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Bytes>, SessiaError>;

    /// Write a key, optionally with a time-to-live
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), SessiaError>;

    /// Raw diagnostic text for an INFO section
    async fn info(&self, section: &str) -> Result<String, SessiaError>;

    /// Release connection resources
    async fn close(&self);
}

/// Creates shard handles for resolved addresses
pub trait ShardConnector: Send + Sync {
    /// Build a handle for `address`; connection is deferred to first use
    fn connect(&self, address: &str) -> Arc<dyn ShardClient>;
}
