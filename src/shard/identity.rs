//! Shard identity assignment
//!
//! A shard's identity lives on the shard itself under [`IDENTITY_KEY`], so
//! it survives restarts of this service and is shared by every router
//! process pointed at the same fleet.

use crate::error::SessiaError;
use crate::shard::client::ShardClient;
use bytes::Bytes;
use rand::RngCore;
use std::collections::HashSet;
use tracing::{info, warn};

/// Key holding a shard's persistent identity
pub const IDENTITY_KEY: &str = "sessia:id";

/// Random bytes per identity (hex encoded, so twice as many characters)
pub const IDENTITY_BYTES: usize = 6;

/// Fresh candidates tried before accepting a collision
const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Generate a random identity: 12 lowercase hex characters
pub fn random_identity() -> String {
    let mut raw = [0u8; IDENTITY_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Whether a stored value can serve as a shard identity
///
/// Session identifiers end in the shard identity after the last separator,
/// so an identity must be non-empty ASCII alphanumerics.
pub fn is_valid_identity(identity: &str) -> bool {
    !identity.is_empty() && identity.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Return the shard's stored identity, creating and persisting one if absent
///
/// `known` holds identities already in use by other shards; a freshly
/// generated identity is regenerated while it collides with one of them.
/// A valid identity the shard already stores is returned as is; an invalid
/// one is overwritten.
pub async fn assign_identity(
    client: &dyn ShardClient,
    known: &HashSet<String>,
) -> Result<String, SessiaError> {
    if let Some(stored) = client.get(IDENTITY_KEY).await? {
        match std::str::from_utf8(&stored) {
            Ok(identity) if is_valid_identity(identity) => return Ok(identity.to_string()),
            _ => warn!(
                address = %client.address(),
                stored = %String::from_utf8_lossy(&stored),
                "Shard holds an unusable identity, reassigning"
            ),
        }
    }

    let mut identity = random_identity();
    for _ in 1..MAX_GENERATION_ATTEMPTS {
        if !known.contains(&identity) {
            break;
        }
        warn!(address = %client.address(), identity = %identity, "Generated identity collides, retrying");
        identity = random_identity();
    }

    client
        .set(IDENTITY_KEY, Bytes::from(identity.clone()), None)
        .await?;

    info!(address = %client.address(), identity = %identity, "Assigned shard identity");
    Ok(identity)
}
