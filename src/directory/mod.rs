//! Service directory
//!
//! Resolves the logical shard service to network addresses. The watcher
//! only sees [`DirectoryClient`]; Consul's catalog is the production backend.

mod consul;

pub use consul::ConsulDirectory;

use crate::error::SessiaError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Network location of one shard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardAddress {
    pub host: String,
    pub port: u16,
}

impl ShardAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ShardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolves a service name and tag to shard addresses
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn resolve(&self, service: &str, tag: &str) -> Result<Vec<ShardAddress>, SessiaError>;
}

/// Fixed address list, replaceable at runtime
///
/// Ignores service and tag. Useful for local runs and tests that need to
/// grow, shrink or break the fleet between refreshes.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    addresses: Arc<RwLock<Option<Vec<ShardAddress>>>>,
}

impl StaticDirectory {
    pub fn new(addresses: Vec<ShardAddress>) -> Self {
        Self {
            addresses: Arc::new(RwLock::new(Some(addresses))),
        }
    }

    /// Replace the address list
    pub fn set(&self, addresses: Vec<ShardAddress>) {
        *self.addresses.write() = Some(addresses);
    }

    /// Make every subsequent resolution fail until [`StaticDirectory::set`]
    pub fn fail(&self) {
        *self.addresses.write() = None;
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn resolve(&self, service: &str, tag: &str) -> Result<Vec<ShardAddress>, SessiaError> {
        self.addresses
            .read()
            .clone()
            .ok_or_else(|| SessiaError::DiscoveryUnavailable {
                service: service.to_string(),
                tag: tag.to_string(),
                source: "static directory marked unavailable".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(ShardAddress::new("10.0.0.7", 6379).to_string(), "10.0.0.7:6379");
        assert_eq!(ShardAddress::new("::1", 6379).to_string(), "[::1]:6379");
    }

    #[tokio::test]
    async fn test_static_directory_fail_and_recover() {
        let directory = StaticDirectory::new(vec![ShardAddress::new("a", 1)]);
        assert_eq!(directory.resolve("redis", "sessia").await.unwrap().len(), 1);

        directory.fail();
        assert!(matches!(
            directory.resolve("redis", "sessia").await,
            Err(SessiaError::DiscoveryUnavailable { .. })
        ));

        directory.set(vec![]);
        assert!(directory.resolve("redis", "sessia").await.unwrap().is_empty());
    }
}
