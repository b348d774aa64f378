//! Session identifier encoding
//!
//! Wire format: `<token>-<shardIdentity>`. Tokens may contain `-` (UUIDs
//! do), so parsing always splits on the last separator.

use crate::error::SessiaError;
use std::fmt;
use uuid::Uuid;

/// Separator between token and shard identity
pub const SEPARATOR: char = '-';

/// Key prefix for session records on a shard
pub const SESSION_PREFIX: &str = "session:";

/// Shard key holding the record for `token`
pub fn record_key(token: &str) -> String {
    format!("{SESSION_PREFIX}{token}")
}

/// Decoded session identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId {
    pub token: String,
    pub shard: String,
}

impl SessionId {
    /// Fresh identifier with a random 128-bit token
    pub fn new(shard: impl Into<String>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            shard: shard.into(),
        }
    }

    /// Split an identifier on its last separator
    pub fn parse(id: &str) -> Result<Self, SessiaError> {
        let malformed = || SessiaError::MalformedIdentifier { id: id.to_string() };

        let (token, shard) = id.rsplit_once(SEPARATOR).ok_or_else(malformed)?;
        if token.is_empty() || shard.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            token: token.to_string(),
            shard: shard.to_string(),
        })
    }

    pub fn record_key(&self) -> String {
        record_key(&self.token)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.token, SEPARATOR, self.shard)
    }
}
