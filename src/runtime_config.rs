// =============================================================================
// Console Configuration — service endpoints, workflow defaults, atomic save
// =============================================================================
//
// Every tunable of the console lives here: where the analysis service is,
// which timeframes and layers start enabled, polling cadence and search
// limits.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Smallest lookback window accepted by the analysis request.
pub const MIN_LOOKBACK: u32 = 200;
/// Largest lookback window accepted by the analysis request.
pub const MAX_LOOKBACK: u32 = 2000;

/// Timeframes the user can toggle on.
pub const AVAILABLE_TIMEFRAMES: &[&str] =
    &["1w", "1d", "12h", "4h", "1h", "30m", "15m", "5m", "1m"];

/// Clamp a lookback candle count into `[MIN_LOOKBACK, MAX_LOOKBACK]`.
pub fn clamp_lookback(lookback: u32) -> u32 {
    lookback.clamp(MIN_LOOKBACK, MAX_LOOKBACK)
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_api_base() -> String {
    "http://127.0.0.1:8000/api".to_string()
}

fn default_symbol_index_url() -> String {
    "/symbols-demo.json".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_timeframes() -> Vec<String> {
    ["4h", "1h", "15m", "5m"].iter().map(|s| s.to_string()).collect()
}

fn default_active_timeframe() -> String {
    "1h".to_string()
}

fn default_lookback() -> u32 {
    600
}

fn default_layers() -> Vec<LayerToggle> {
    vec![
        LayerToggle::new("order_block", "Order Blocks", true),
        LayerToggle::new("liquidity", "Liquidity", true),
        LayerToggle::new("fvg", "FVG", false),
        LayerToggle::new("microstructure", "Microstructure", false),
    ]
}

fn default_live_poll_secs() -> u64 {
    30
}

fn default_history_limit() -> usize {
    1000
}

fn default_notification_ttl_ms() -> u64 {
    4000
}

fn default_min_query_len() -> usize {
    2
}

fn default_local_limit() -> usize {
    8
}

fn default_remote_limit() -> usize {
    12
}

// =============================================================================
// LayerToggle
// =============================================================================

/// A chart overlay layer the user can switch on or off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerToggle {
    /// Layer key sent to `/analyze` and matched against overlay kinds.
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub enabled: bool,
}

impl LayerToggle {
    pub fn new(key: &str, label: &str, enabled: bool) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            enabled,
        }
    }
}

// =============================================================================
// SearchSettings
// =============================================================================

/// Limits used by the search-bar flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Queries shorter than this (in chars) are not searched.
    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,

    /// Result count for the immediate local answer.
    #[serde(default = "default_local_limit")]
    pub local_limit: usize,

    /// Result count requested remotely and for the merged re-rank.
    #[serde(default = "default_remote_limit")]
    pub remote_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_query_len: default_min_query_len(),
            local_limit: default_local_limit(),
            remote_limit: default_remote_limit(),
        }
    }
}

// =============================================================================
// ConsoleConfig
// =============================================================================

/// Top-level configuration for the console.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    // --- Service --------------------------------------------------------------

    /// Base URL of the analysis service (`/search`, `/history`, ...).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bootstrap symbol catalog. Relative URLs resolve against `api_base`'s
    /// origin.
    #[serde(default = "default_symbol_index_url")]
    pub symbol_index_url: String,

    /// HTTP client timeout for every request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // --- Workflow defaults ----------------------------------------------------

    /// Timeframes active at startup (sent with every analysis).
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    /// Timeframe whose candles are displayed.
    #[serde(default = "default_active_timeframe")]
    pub active_timeframe: String,

    /// Candles per timeframe requested by `/analyze` (200..=2000).
    #[serde(default = "default_lookback")]
    pub lookback: u32,

    /// Overlay layers and their initial state.
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerToggle>,

    // --- Streams --------------------------------------------------------------

    /// Live price polling interval.
    #[serde(default = "default_live_poll_secs")]
    pub live_poll_secs: u64,

    /// Candles requested per history load.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Notification lifetime; 0 keeps notifications until dismissed.
    #[serde(default = "default_notification_ttl_ms")]
    pub notification_ttl_ms: u64,

    // --- Search ---------------------------------------------------------------

    #[serde(default)]
    pub search: SearchSettings,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            symbol_index_url: default_symbol_index_url(),
            request_timeout_secs: default_request_timeout_secs(),
            timeframes: default_timeframes(),
            active_timeframe: default_active_timeframe(),
            lookback: default_lookback(),
            layers: default_layers(),
            live_poll_secs: default_live_poll_secs(),
            history_limit: default_history_limit(),
            notification_ttl_ms: default_notification_ttl_ms(),
            search: SearchSettings::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read console config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse console config from {}", path.display()))?;

        info!(
            path = %path.display(),
            api_base = %config.api_base,
            timeframes = ?config.timeframes,
            "console config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise console config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "console config saved (atomic)");
        Ok(())
    }

    /// Apply `ORYON_API_BASE` / `ORYON_SYMBOL_INDEX_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base) = std::env::var("ORYON_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base = base.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("ORYON_SYMBOL_INDEX_URL") {
            if !url.trim().is_empty() {
                self.symbol_index_url = url.trim().to_string();
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_secs(self.live_poll_secs.max(1))
    }

    pub fn notification_ttl(&self) -> Option<Duration> {
        (self.notification_ttl_ms > 0).then(|| Duration::from_millis(self.notification_ttl_ms))
    }
}
