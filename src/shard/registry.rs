//! Shard registry
//!
//! Holds the current immutable [`Snapshot`] of the fleet. Readers clone an
//! `Arc` under a short read lock and keep working on that view; the watcher
//! builds the next snapshot while readers continue and only takes the write
//! lock for the pointer swap.

use crate::shard::client::ShardClient;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One live shard at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInstance {
    /// Stable identity, unique within a snapshot
    pub identity: String,
    /// Address the shard was resolved at
    pub address: String,
    /// Reported memory usage in bytes (advisory)
    pub memory_used: u64,
}

/// Point-in-time view of the fleet
///
/// Every instance identity has an entry in the client mapping, and
/// identities are unique.
#[derive(Default)]
pub struct Snapshot {
    version: u64,
    instances: Vec<ShardInstance>,
    clients: HashMap<String, Arc<dyn ShardClient>>,
}

impl Snapshot {
    /// Monotonic publish counter; 0 for the initial empty snapshot
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn instances(&self) -> &[ShardInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Client handle for a shard identity
    pub fn client(&self, identity: &str) -> Option<&Arc<dyn ShardClient>> {
        self.clients.get(identity)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|i| i.identity.as_str())
    }

    /// Total reported memory across the fleet
    pub fn total_memory(&self) -> u64 {
        self.instances.iter().map(|i| i.memory_used).sum()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("instances", &self.instances)
            .field("clients", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared handle to the published snapshot
#[derive(Clone, Default)]
pub struct Registry {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl Registry {
    /// Create a registry holding an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest published snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Client for `identity` in the latest snapshot
    pub fn client_for(&self, identity: &str) -> Option<Arc<dyn ShardClient>> {
        self.current.read().client(identity).cloned()
    }

    /// Number of shards in the latest snapshot
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Replace the published snapshot
    ///
    /// `new_clients` are merged into the existing identity mapping. An
    /// existing entry wins unless the new client talks to a different
    /// address, in which case it replaces the old one. Replaced clients and
    /// those of identities absent from `instances` are returned so the
    /// caller can close them. Instances without a client, or repeating an
    /// earlier identity, are dropped.
    pub fn publish(
        &self,
        instances: Vec<ShardInstance>,
        new_clients: HashMap<String, Arc<dyn ShardClient>>,
    ) -> Vec<Arc<dyn ShardClient>> {
        // Upgradable read: plain readers proceed while the next snapshot is built
        let guard = self.current.upgradable_read();

        let mut clients = guard.clients.clone();
        let mut released = Vec::new();
        for (identity, client) in new_clients {
            match clients.entry(identity) {
                Entry::Occupied(mut slot) if slot.get().address() != client.address() => {
                    debug!(
                        identity = %slot.key(),
                        from = %slot.get().address(),
                        to = %client.address(),
                        "Shard moved, replacing client"
                    );
                    released.push(slot.insert(client));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(client);
                }
            }
        }

        let mut seen = HashSet::with_capacity(instances.len());
        let instances: Vec<ShardInstance> = instances
            .into_iter()
            .filter(|inst| {
                if !clients.contains_key(&inst.identity) {
                    warn!(identity = %inst.identity, "Dropping shard without client handle");
                    return false;
                }
                if !seen.insert(inst.identity.clone()) {
                    warn!(identity = %inst.identity, address = %inst.address, "Dropping duplicate shard identity");
                    return false;
                }
                true
            })
            .collect();

        clients.retain(|identity, client| {
            if seen.contains(identity) {
                true
            } else {
                debug!(identity = %identity, "Releasing client for departed shard");
                released.push(Arc::clone(client));
                false
            }
        });

        let next = Arc::new(Snapshot {
            version: guard.version + 1,
            instances,
            clients,
        });

        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        *write = next;
        released
    }
}
