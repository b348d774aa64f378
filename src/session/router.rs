//! Session router
//!
//! Save picks a shard from the current snapshot and returns an identifier
//! that names that shard; Query decodes the identifier and reads from the
//! shard it names. No index maps tokens to shards.

use crate::error::SessiaError;
use crate::metrics::SessiaMetrics;
use crate::session::id::SessionId;
use crate::session::select::SelectionStrategy;
use crate::session::usage::RouterUsage;
use crate::shard::Registry;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes session records across the registry's shards
#[derive(Clone)]
pub struct SessionRouter {
    registry: Registry,
    strategy: Arc<dyn SelectionStrategy>,
    ttl: Duration,
    metrics: Arc<SessiaMetrics>,
    usage: RouterUsage,
}

impl SessionRouter {
    pub fn new(
        registry: Registry,
        strategy: Arc<dyn SelectionStrategy>,
        ttl: Duration,
        metrics: Arc<SessiaMetrics>,
    ) -> Self {
        Self {
            registry,
            strategy,
            ttl,
            metrics,
            usage: RouterUsage::new(),
        }
    }

    /// Per-shard routing counters
    pub fn usage(&self) -> &RouterUsage {
        &self.usage
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Store `payload` on a shard and return its session identifier
    pub async fn save(&self, payload: &[u8]) -> Result<String, SessiaError> {
        let snapshot = self.registry.current();

        let instance = match self.strategy.select(snapshot.instances()) {
            Some(instance) => instance,
            None => {
                let err = SessiaError::NoShardsAvailable;
                self.metrics.record_error(&err);
                return Err(err);
            }
        };

        let client = snapshot
            .client(&instance.identity)
            .ok_or_else(|| SessiaError::UnknownShard {
                identity: instance.identity.clone(),
            })?;

        let id = SessionId::new(instance.identity.as_str());
        if let Err(e) = client
            .set(&id.record_key(), Bytes::copy_from_slice(payload), Some(self.ttl))
            .await
        {
            warn!(identity = %instance.identity, error = %e, "Failed to store session");
            self.metrics.record_error(&e);
            return Err(e);
        }

        self.usage.record_save(&instance.identity);
        self.metrics.record_save(&instance.identity);
        debug!(identity = %instance.identity, bytes = payload.len(), "Session saved");

        Ok(id.to_string())
    }

    /// Fetch the payload stored under a session identifier
    pub async fn query(&self, id: &str) -> Result<Bytes, SessiaError> {
        let result = self.lookup(id).await;
        match &result {
            Ok(_) => self.metrics.record_query("hit"),
            Err(e) if e.is_not_found() => self.metrics.record_query("miss"),
            Err(e) => {
                self.metrics.record_query("error");
                self.metrics.record_error(e);
            }
        }
        result
    }

    async fn lookup(&self, id: &str) -> Result<Bytes, SessiaError> {
        let id = SessionId::parse(id)?;

        let client = self
            .registry
            .client_for(&id.shard)
            .ok_or_else(|| SessiaError::UnknownShard {
                identity: id.shard.clone(),
            })?;

        match client.get(&id.record_key()).await? {
            Some(payload) => {
                self.usage.record_hit(&id.shard);
                Ok(payload)
            }
            None => {
                self.usage.record_miss(&id.shard);
                Err(SessiaError::RecordNotFound { token: id.token })
            }
        }
    }
}
