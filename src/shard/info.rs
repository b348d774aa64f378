//! Shard info collection
//!
//! Parses the flat `key:value` blob returned by INFO. Collection never fails
//! a refresh: anything missing or malformed reads as zero.

use crate::shard::client::ShardClient;
use std::collections::HashMap;
use tracing::warn;

/// INFO section queried each refresh
pub const MEMORY_SECTION: &str = "memory";

/// Lightweight runtime statistics for one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Bytes in use as reported by the shard (advisory)
    pub memory_used: u64,
}

/// Split an INFO blob into its `key:value` pairs
///
/// Lines are CRLF separated. A line counts only when it splits on `:` into
/// exactly two parts; section headers, blanks and values containing `:` are
/// skipped.
pub fn parse_info(blob: &str) -> HashMap<String, String> {
    blob.split("\r\n")
        .filter_map(|line| {
            let mut parts = line.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Extract stats from a parsed INFO map
pub fn stats_from_info(info: &HashMap<String, String>) -> ShardStats {
    let memory_used = info
        .get("used_memory")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    ShardStats { memory_used }
}

/// Query a shard for its stats
pub async fn collect_stats(client: &dyn ShardClient) -> ShardStats {
    match client.info(MEMORY_SECTION).await {
        Ok(blob) => stats_from_info(&parse_info(&blob)),
        Err(e) => {
            warn!(address = %client.address(), error = %e, "Failed to collect shard stats");
            ShardStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::MemoryShard;

    #[test]
    fn test_parse_info_ignores_headers_and_blanks() {
        let blob = "# Memory\r\nused_memory:1048576\r\n\r\nused_memory_human:1.00M\r\n";
        let info = parse_info(blob);
        assert_eq!(info.len(), 2);
        assert_eq!(info["used_memory"], "1048576");
        assert!(!info.contains_key("# Memory"));
    }

    #[test]
    fn test_parse_info_skips_multi_colon_lines() {
        let info = parse_info("executable:/usr/bin/redis:server\r\nused_memory:7");
        assert!(!info.contains_key("executable"));
        assert_eq!(info["used_memory"], "7");
    }

    #[test]
    fn test_malformed_memory_is_zero() {
        let info = parse_info("used_memory:lots\r\n");
        assert_eq!(stats_from_info(&info).memory_used, 0);
        assert_eq!(stats_from_info(&HashMap::new()).memory_used, 0);
    }

    #[tokio::test]
    async fn test_collect_stats_degrades_on_failure() {
        let shard = MemoryShard::new("mem:1");
        shard.set_available(false);
        assert_eq!(collect_stats(&shard).await, ShardStats::default());
    }
}
