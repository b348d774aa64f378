//! Sessia - sharded session store
//!
//! Routes opaque session records to one of several Redis shards discovered
//! through Consul. The identifier returned by a save names the shard that
//! holds the record, so reads locate it without a central index.
//!
//! - [`shard::DirectoryWatcher`] keeps the [`shard::Registry`] snapshot current
//! - [`session::SessionRouter`] implements save/query on top of it
//! - [`api`] exposes both over HTTP with health and metrics endpoints

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod metrics;
pub mod session;
pub mod shard;

pub use error::SessiaError;
