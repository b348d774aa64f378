//! Session routing module
//!
//! Save/Query over the shard registry and the opaque identifier format.

pub mod id;
mod router;
pub mod select;
mod usage;

pub use id::{SessionId, SESSION_PREFIX};
pub use router::SessionRouter;
pub use select::{strategy_for, LeastMemorySelection, RandomSelection, SelectionStrategy};
pub use usage::RouterUsage;
