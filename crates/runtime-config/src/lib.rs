//! Runtime configuration for turnline hosts.
//!
//! Hosts read `turnline.toml` once at startup and hand the relevant sections
//! to the transcript builder, the viewport and the backfill transport.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "turnline.toml";

/// Top-level configuration (persisted as `turnline.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub transcript: TranscriptSettings,
    #[serde(default)]
    pub viewport: ViewportSettings,
    #[serde(default)]
    pub backfill: BackfillSettings,
    #[serde(default)]
    pub inbound: InboundSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSettings {
    /// Regexes that mark a user-channel message as system generated.
    /// Empty means the built-in handoff patterns.
    #[serde(default)]
    pub system_patterns: Vec<String>,
    /// Tool input fields checked, in order, for a batching target.
    /// Empty means the built-in file path fields.
    #[serde(default)]
    pub batch_target_fields: Vec<String>,
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            system_patterns: Vec::new(),
            batch_target_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewportSettings {
    /// Rows from the bottom still treated as "at the latest turn".
    #[serde(default = "default_auto_follow_threshold_rows")]
    pub auto_follow_threshold_rows: usize,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            auto_follow_threshold_rows: default_auto_follow_threshold_rows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillSettings {
    /// Events requested per "load earlier" page.
    #[serde(default = "default_backfill_page_size")]
    pub page_size: usize,
    #[serde(default = "default_backfill_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            page_size: default_backfill_page_size(),
            timeout_ms: default_backfill_timeout_ms(),
        }
    }
}

impl BackfillSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundSettings {
    /// Capacity of the per-session inbound channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_auto_follow_threshold_rows() -> usize {
    2
}
fn default_backfill_page_size() -> usize {
    50
}
fn default_backfill_timeout_ms() -> u64 {
    10_000
}
fn default_channel_capacity() -> usize {
    256
}

/// Replace values that would leave a component unusable with defaults.
/// Returns true when any field was updated.
pub fn apply_compat_fallbacks(config: &mut RuntimeConfig) -> bool {
    let mut changed = false;

    if config.backfill.page_size == 0 {
        config.backfill.page_size = default_backfill_page_size();
        changed = true;
    }

    if config.backfill.timeout_ms == 0 {
        config.backfill.timeout_ms = default_backfill_timeout_ms();
        changed = true;
    }

    if config.inbound.channel_capacity == 0 {
        config.inbound.channel_capacity = default_channel_capacity();
        changed = true;
    }

    changed
}

/// Load configuration from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(RuntimeConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut config: RuntimeConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;

    if apply_compat_fallbacks(&mut config) {
        tracing::info!("Applied config fallbacks for {}", path.display());
    }
    Ok(config)
}

/// Load `turnline.toml` from a directory.
pub fn load_config_in(dir: &Path) -> Result<RuntimeConfig> {
    load_config(&dir.join(CONFIG_FILE_NAME))
}
