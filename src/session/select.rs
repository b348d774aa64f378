//! Shard selection strategies for new sessions

use crate::config::Balancing;
use crate::shard::ShardInstance;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Chooses the shard a new session is written to
pub trait SelectionStrategy: Send + Sync {
    /// Pick one instance; `None` only when `instances` is empty
    fn select<'a>(&self, instances: &'a [ShardInstance]) -> Option<&'a ShardInstance>;
}

/// Uniform random choice
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn select<'a>(&self, instances: &'a [ShardInstance]) -> Option<&'a ShardInstance> {
        instances.choose(&mut rand::thread_rng())
    }
}

/// Lowest reported memory usage, ties broken at random
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastMemorySelection;

impl SelectionStrategy for LeastMemorySelection {
    fn select<'a>(&self, instances: &'a [ShardInstance]) -> Option<&'a ShardInstance> {
        let min = instances.iter().map(|i| i.memory_used).min()?;
        let candidates: Vec<&ShardInstance> = instances
            .iter()
            .filter(|i| i.memory_used == min)
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

/// Strategy for a configured balancing policy
pub fn strategy_for(balancing: Balancing) -> Arc<dyn SelectionStrategy> {
    match balancing {
        Balancing::Random => Arc::new(RandomSelection),
        Balancing::Memory => Arc::new(LeastMemorySelection),
    }
}
