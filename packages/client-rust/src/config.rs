//! Configuration types for the pivot client.

use std::time::Duration;

use pivot_core::MessageType;
use serde::{Deserialize, Serialize};

/// Settings for one data load service slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Channel topic query requests are sent on.
    pub topic: String,
    /// Interval between channel readiness checks.
    pub poll_interval: Duration,
    /// Give up waiting for the channel after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Message types a listener is registered for on each request.
    pub message_types: Vec<MessageType>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            topic: "pivot2/query".to_string(),
            poll_interval: Duration::from_millis(100),
            max_wait: None,
            message_types: MessageType::ALL.to_vec(),
        }
    }
}

/// Top-level configuration shared by every builder created from a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    pub load: LoadConfig,
    /// Page size used when the caller does not pick one.
    pub default_page_size: usize,
    /// Label sent as the grand-totals title.
    pub grand_totals_title: String,
    /// Maximum number of memoized grids.
    pub grid_cache_capacity: usize,
    /// Maximum number of cached query results per builder.
    pub result_cache_capacity: usize,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            load: LoadConfig::default(),
            default_page_size: 100,
            grand_totals_title: "Grand Total".to_string(),
            grid_cache_capacity: 64,
            result_cache_capacity: 16,
        }
    }
}

/// Log output settings, turned into an `EnvFilter` by [`crate::logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level for every target.
    pub level: String,
    /// Targets raised to `debug`.
    pub include: Vec<String>,
    /// Targets silenced entirely.
    pub exclude: Vec<String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
            json: false,
        }
    }
}
