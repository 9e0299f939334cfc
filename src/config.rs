//! Tunables for the streaming indexer and lookup facade.
//!
//! Defaults match the reference system; each can be overridden by an
//! environment variable, the same way the original `config.ParseConfig`
//! overlays `os.Getenv` values onto hardcoded defaults.

use std::time::Duration;

/// Layer-message channel capacity (§5: bounded queues provide backpressure
/// against a runaway downloader).
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Lookup facade retry interval while an image index is still incomplete.
const DEFAULT_LOOKUP_RETRY_MS: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    pub channel_capacity: usize,
    pub lookup_retry_interval: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            lookup_retry_interval: Duration::from_millis(DEFAULT_LOOKUP_RETRY_MS),
        }
    }
}

impl IndexerConfig {
    /// Builds a config from defaults overlaid with environment variables.
    /// Unset or unparsable variables fall back to the default silently,
    /// matching the reference implementation's tolerant env parsing.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var("FSOVERLAY_CHANNEL_CAPACITY") {
            if let Ok(value) = raw.parse() {
                cfg.channel_capacity = value;
            }
        }

        if let Ok(raw) = std::env::var("FSOVERLAY_LOOKUP_RETRY_MS") {
            if let Ok(value) = raw.parse() {
                cfg.lookup_retry_interval = Duration::from_millis(value);
            }
        }

        cfg
    }
}
