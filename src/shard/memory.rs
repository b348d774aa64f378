//! In-process shard
//!
//! Behaves like a single Redis instance for the commands Sessia issues.
//! Used by the test suites and for running the service without backends.

use crate::error::SessiaError;
use crate::shard::client::{ShardClient, ShardConnector};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory key-value shard with expiry
#[derive(Debug)]
pub struct MemoryShard {
    address: String,
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    writes: AtomicU64,
    closed: AtomicU64,
}

impl MemoryShard {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Simulate the shard going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every key, as after a restart without persistence
    pub fn flush(&self) {
        self.entries.lock().clear();
    }

    /// Number of SET commands served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of times a handle to this shard was closed
    pub fn close_count(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Live keys with the given prefix
    pub fn count_prefix(&self, prefix: &str) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .count()
    }

    fn check_available(&self) -> Result<(), SessiaError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessiaError::ShardUnavailable {
                address: self.address.clone(),
                source: Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "shard down")),
            })
        }
    }

    fn used_memory(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| k.len() + e.value.len())
            .sum()
    }
}

#[async_trait]
impl ShardClient for MemoryShard {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, SessiaError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let found = entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.value.clone()));
        match found {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), SessiaError> {
        self.check_available()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn info(&self, section: &str) -> Result<String, SessiaError> {
        self.check_available()?;
        let used = self.used_memory();
        Ok(format!(
            "# {}\r\nused_memory:{}\r\nused_memory_human:{}B\r\nmaxmemory_policy:noeviction\r\n",
            section, used, used
        ))
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connector handing out one [`MemoryShard`] per address
///
/// Connecting twice to the same address yields the same shard, so state
/// survives across refresh cycles the way a real backend's does.
#[derive(Debug, Default, Clone)]
pub struct MemoryConnector {
    shards: Arc<DashMap<String, Arc<MemoryShard>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard behind `address`, creating it if needed
    pub fn shard(&self, address: &str) -> Arc<MemoryShard> {
        self.shards
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MemoryShard::new(address)))
            .clone()
    }
}

impl ShardConnector for MemoryConnector {
    fn connect(&self, address: &str) -> Arc<dyn ShardClient> {
        self.shard(address)
    }
}
