//! Consul catalog directory

use super::{DirectoryClient, ShardAddress};
use crate::error::SessiaError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Catalog entry fields Sessia reads
#[derive(Debug, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "ServiceAddress", default)]
    pub service_address: String,
    #[serde(rename = "ServicePort", default)]
    pub service_port: u16,
}

impl CatalogService {
    /// Service address, falling back to the node address, then the default port
    pub fn to_shard_address(&self, default_port: u16) -> Option<ShardAddress> {
        let host = if self.service_address.is_empty() {
            &self.address
        } else {
            &self.service_address
        };
        if host.is_empty() {
            return None;
        }
        let port = if self.service_port == 0 {
            default_port
        } else {
            self.service_port
        };
        Some(ShardAddress::new(host.clone(), port))
    }
}

/// Directory backed by Consul's `/v1/catalog/service` endpoint
#[derive(Debug, Clone)]
pub struct ConsulDirectory {
    base_url: String,
    default_port: u16,
    http: reqwest::Client,
}

impl ConsulDirectory {
    /// Build a client for `base_url` (e.g. `http://127.0.0.1:8500`)
    pub fn new(base_url: &str, default_port: u16, timeout: Duration) -> Result<Self, SessiaError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessiaError::Config(format!("failed to build Consul HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_port,
            http,
        })
    }

    fn unavailable(service: &str, tag: &str, source: reqwest::Error) -> SessiaError {
        SessiaError::DiscoveryUnavailable {
            service: service.to_string(),
            tag: tag.to_string(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl DirectoryClient for ConsulDirectory {
    async fn resolve(&self, service: &str, tag: &str) -> Result<Vec<ShardAddress>, SessiaError> {
        let url = format!("{}/v1/catalog/service/{}", self.base_url, service);

        let entries: Vec<CatalogService> = self
            .http
            .get(&url)
            .query(&[("tag", tag)])
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Self::unavailable(service, tag, e))?
            .json()
            .await
            .map_err(|e| Self::unavailable(service, tag, e))?;

        let addresses: Vec<ShardAddress> = entries
            .iter()
            .filter_map(|entry| entry.to_shard_address(self.default_port))
            .collect();

        debug!(service, tag, count = addresses.len(), "Resolved shard addresses");
        Ok(addresses)
    }
}
