//! Domain error types for Sessia
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, SessiaError>.

use thiserror::Error;

/// Boxed source error carried by transport-level variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Sessia domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// Request-path variants map onto HTTP status codes in the API layer;
/// refresh-path variants are logged and counted, never fatal.
///
/// Example log output:
/// ```text
/// SessiaError::UnknownShard { identity: "9c1a2b3d4e5f" }
/// → "unknown shard identity '9c1a2b3d4e5f'"
/// ```
#[derive(Error, Debug)]
pub enum SessiaError {
    /// Directory resolution failed; the refresh cycle is aborted
    #[error("directory resolution failed for service '{service}' (tag '{tag}')")]
    DiscoveryUnavailable {
        service: String,
        tag: String,
        #[source]
        source: BoxError,
    },

    /// Save attempted while the current snapshot holds no shards
    #[error("no shards available")]
    NoShardsAvailable,

    /// Session identifier references a shard absent from the current snapshot
    #[error("unknown shard identity '{identity}'")]
    UnknownShard { identity: String },

    /// Record absent or expired on its shard
    #[error("session record '{token}' not found")]
    RecordNotFound { token: String },

    /// Session identifier could not be split into token and shard identity
    #[error("malformed session identifier '{id}'")]
    MalformedIdentifier { id: String },

    /// Transport failure talking to a shard
    #[error("shard {address} unavailable")]
    ShardUnavailable {
        address: String,
        #[source]
        source: BoxError,
    },

    /// Shard replied with an error or an unexpected frame
    #[error("shard {address} protocol error: {message}")]
    ShardProtocol { address: String, message: String },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Prometheus recorder could not be installed
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl SessiaError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `sessia_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::DiscoveryUnavailable { .. } => "discovery_unavailable",
            Self::NoShardsAvailable => "no_shards",
            Self::UnknownShard { .. } => "unknown_shard",
            Self::RecordNotFound { .. } => "record_not_found",
            Self::MalformedIdentifier { .. } => "malformed_identifier",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::ShardProtocol { .. } => "shard_protocol",
            Self::Config(_) => "config",
            Self::Metrics(_) => "metrics",
        }
    }

    /// True for the variants surfaced to callers as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownShard { .. } | Self::RecordNotFound { .. } | Self::MalformedIdentifier { .. }
        )
    }
}
