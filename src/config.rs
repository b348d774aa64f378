//! Service configuration
//!
//! Handles loading configuration from environment variables.

use crate::error::SessiaError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Shard selection policy for new sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balancing {
    /// Uniform random choice among known shards
    Random,
    /// Prefer the shard reporting the lowest memory usage
    Memory,
}

impl FromStr for Balancing {
    type Err = SessiaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Balancing::Random),
            "memory" => Ok(Balancing::Memory),
            other => Err(SessiaError::Config(format!(
                "BALANCING must be 'random' or 'memory', got '{other}'"
            ))),
        }
    }
}

/// Sessia configuration
#[derive(Debug, Clone)]
pub struct SessiaConfig {
    /// Consul HTTP API base URL
    pub consul_addr: String,

    /// Catalog service name the shards register under
    pub shard_service: String,

    /// Catalog tag selecting session shards
    pub shard_tag: String,

    /// Port used when the catalog reports none
    pub shard_port: u16,

    /// Directory refresh interval
    pub refresh_interval: Duration,

    /// Session record time-to-live
    pub session_ttl: Duration,

    /// Per-request shard timeout
    pub shard_timeout: Duration,

    /// Session API / health / metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Shard selection policy
    pub balancing: Balancing,
}

impl SessiaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SessiaError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessiaError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let consul_addr = lookup("CONSUL_ADDR").unwrap_or_else(|| "127.0.0.1:8500".to_string());
        let consul_addr = if consul_addr.starts_with("http://") || consul_addr.starts_with("https://") {
            consul_addr
        } else {
            format!("http://{consul_addr}")
        };

        let shard_service = lookup("SHARD_SERVICE").unwrap_or_else(|| "redis".to_string());
        let shard_tag = lookup("SHARD_TAG").unwrap_or_else(|| "sessia".to_string());

        let shard_port = parse_var(&lookup, "SHARD_PORT", 6379u16)?;

        let refresh_ms = parse_var(&lookup, "REFRESH_INTERVAL_MS", 1000u64)?;
        if refresh_ms == 0 {
            return Err(SessiaError::Config(
                "REFRESH_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let ttl_secs = parse_var(&lookup, "SESSION_TTL_SECS", 60u64)?;
        if ttl_secs == 0 {
            return Err(SessiaError::Config(
                "SESSION_TTL_SECS must be greater than zero".to_string(),
            ));
        }

        let timeout_ms = parse_var(&lookup, "SHARD_TIMEOUT_MS", 2000u64)?;
        let http_port = parse_var(&lookup, "HTTP_PORT", 8000u16)?;
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let balancing = match lookup("BALANCING") {
            Some(value) => value.parse()?,
            None => Balancing::Random,
        };

        Ok(Self {
            consul_addr,
            shard_service,
            shard_tag,
            shard_port,
            refresh_interval: Duration::from_millis(refresh_ms),
            session_ttl: Duration::from_secs(ttl_secs),
            shard_timeout: Duration::from_millis(timeout_ms),
            http_port,
            log_level,
            balancing,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, SessiaError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SessiaError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}
