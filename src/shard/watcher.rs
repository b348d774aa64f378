//! Directory watcher
//!
//! Re-resolves the shard directory on a fixed interval and publishes a new
//! registry snapshot. Each refresh runs as its own task; a tick that fires
//! while the previous refresh is still running is skipped.

use crate::directory::{DirectoryClient, ShardAddress};
use crate::error::SessiaError;
use crate::metrics::SessiaMetrics;
use crate::shard::client::{ShardClient, ShardConnector};
use crate::shard::identity::assign_identity;
use crate::shard::info::collect_stats;
use crate::shard::registry::{Registry, ShardInstance, Snapshot};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What to resolve and how often
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub service: String,
    pub tag: String,
    pub interval: Duration,
}

/// Periodically rebuilds the registry from the directory
#[derive(Clone)]
pub struct DirectoryWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    directory: Arc<dyn DirectoryClient>,
    connector: Arc<dyn ShardConnector>,
    registry: Registry,
    settings: WatcherSettings,
    metrics: Arc<SessiaMetrics>,
    refreshing: AtomicBool,
}

/// Clears the in-progress flag even if the refresh task panics
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Lifecycle handle for a spawned watcher
pub struct WatcherHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the tick loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the tick loop, and any refresh it started, to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Directory watcher task failed");
        }
    }
}

impl DirectoryWatcher {
    pub fn new(
        directory: Arc<dyn DirectoryClient>,
        connector: Arc<dyn ShardConnector>,
        registry: Registry,
        settings: WatcherSettings,
        metrics: Arc<SessiaMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                directory,
                connector,
                registry,
                settings,
                metrics,
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Start the tick loop in the background
    pub fn spawn(self) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        WatcherHandle { shutdown_tx, task }
    }

    /// Tick until `shutdown` fires
    ///
    /// The first tick fires immediately, so the registry is populated as
    /// soon as the watcher starts.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.inner.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(
            service = %self.inner.settings.service,
            tag = %self.inner.settings.tag,
            interval_ms = self.inner.settings.interval.as_millis() as u64,
            "Directory watcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.inner.refreshing.swap(true, Ordering::AcqRel) {
                        debug!("Previous refresh still running, skipping tick");
                        continue;
                    }
                    let watcher = self.clone();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = RefreshGuard(&watcher.inner.refreshing);
                        // Failures are logged and counted inside refresh
                        let _ = watcher.refresh().await;
                    }));
                }
                _ = shutdown.recv() => {
                    info!("Directory watcher received shutdown signal");
                    break;
                }
            }
        }

        if let Some(task) = in_flight {
            let _ = task.await;
        }
        info!("Directory watcher stopped");
    }

    /// Run one refresh cycle and return the number of published shards
    ///
    /// A directory failure aborts the cycle and leaves the current snapshot
    /// in place. Per-shard failures drop only that shard.
    pub async fn refresh(&self) -> Result<usize, SessiaError> {
        let inner = &self.inner;
        let start = Instant::now();

        let resolved = match inner
            .directory
            .resolve(&inner.settings.service, &inner.settings.tag)
            .await
        {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(error = %e, "Directory resolution failed, keeping previous snapshot");
                inner.metrics.record_refresh_failure(&e);
                return Err(e);
            }
        };

        let current = inner.registry.current();
        let mut taken: HashSet<String> = current.identities().map(str::to_string).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut instances = Vec::with_capacity(resolved.len());
        let mut new_clients: HashMap<String, Arc<dyn ShardClient>> = HashMap::new();

        for address in dedup_addresses(resolved) {
            let address = address.to_string();
            let (client, fresh) = match client_at(&current, &address) {
                Some(client) => (client, false),
                None => (inner.connector.connect(&address), true),
            };

            let identity = match assign_identity(client.as_ref(), &taken).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(address = %address, error = %e, "Failed to obtain shard identity, skipping shard");
                    inner.metrics.record_error(&e);
                    if fresh {
                        client.close().await;
                    }
                    continue;
                }
            };

            if !seen.insert(identity.clone()) {
                warn!(address = %address, identity = %identity, "Identity already claimed by another shard, skipping");
                if fresh {
                    client.close().await;
                }
                continue;
            }
            taken.insert(identity.clone());

            // A handle already registered for this identity wins while the shard stays put
            let client = match current.client(&identity) {
                Some(existing) if Arc::ptr_eq(existing, &client) => client,
                Some(existing) if existing.address() == client.address() => {
                    if fresh {
                        client.close().await;
                    }
                    Arc::clone(existing)
                }
                _ => {
                    new_clients.insert(identity.clone(), Arc::clone(&client));
                    client
                }
            };

            let stats = collect_stats(client.as_ref()).await;
            instances.push(ShardInstance {
                identity,
                address,
                memory_used: stats.memory_used,
            });
        }

        let released = inner.registry.publish(instances, new_clients);
        let snapshot = inner.registry.current();
        for client in released {
            // A shard that lost its data re-registers under a new identity on the same handle
            let still_used = snapshot
                .identities()
                .filter_map(|identity| snapshot.client(identity))
                .any(|live| Arc::ptr_eq(live, &client));
            if !still_used {
                debug!(address = %client.address(), "Closing client for departed shard");
                client.close().await;
            }
        }

        let departed: Vec<&str> = current
            .identities()
            .filter(|identity| snapshot.client(identity).is_none())
            .collect();
        inner.metrics.record_refresh(start.elapsed(), &snapshot);
        inner.metrics.record_departed(&departed);
        log_usage(&snapshot);

        Ok(snapshot.len())
    }
}

/// Drop repeated addresses, keeping first-seen order
fn dedup_addresses(addresses: Vec<ShardAddress>) -> Vec<ShardAddress> {
    let mut seen = HashSet::with_capacity(addresses.len());
    addresses
        .into_iter()
        .filter(|address| seen.insert(address.clone()))
        .collect()
}

/// Client already serving `address` in the snapshot, if any
fn client_at(snapshot: &Snapshot, address: &str) -> Option<Arc<dyn ShardClient>> {
    snapshot
        .instances()
        .iter()
        .find(|instance| instance.address == address)
        .and_then(|instance| snapshot.client(&instance.identity))
        .cloned()
}

fn log_usage(snapshot: &Snapshot) {
    info!(
        shards = snapshot.len(),
        version = snapshot.version(),
        memory_total = snapshot.total_memory(),
        "Published shard snapshot"
    );
    for (index, instance) in snapshot.instances().iter().enumerate() {
        debug!(
            index,
            identity = %instance.identity,
            address = %instance.address,
            memory_used = instance.memory_used,
            "Shard usage"
        );
    }
}
