//! Relay settings with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;

/// Top-level settings for the relay process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub control: ControlSettings,
    pub surface: SurfaceSettings,
    pub extract: ExtractSettings,
}

/// Control-channel connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Control-channel endpoint.
    pub url: String,
    /// Liveness probe cadence while connected.
    pub heartbeat_interval_secs: u64,
    /// Fixed delay between reconnect attempts. No backoff, no cap.
    pub reconnect_interval_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/ws".into(),
            heartbeat_interval_secs: 20,
            reconnect_interval_secs: 5,
        }
    }
}

impl ControlSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// Automation-surface settings: where the browser's debug endpoint lives and
/// how the driven page is addressed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceSettings {
    pub cdp_host: String,
    pub cdp_port: u16,
    /// Observation snapshot cadence.
    pub poll_interval_ms: u64,
    /// Delay between injecting input and clicking submit, so the host UI's
    /// own reactivity registers the injected value first.
    pub settle_delay_ms: u64,
    pub selectors: SelectorSet,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            cdp_host: "127.0.0.1".into(),
            cdp_port: 9222,
            poll_interval_ms: 250,
            settle_delay_ms: 100,
            selectors: SelectorSet::default(),
        }
    }
}

impl SurfaceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Selector vocabulary of the driven page. Configuration, not code: a host
/// UI restyle means editing these, not the relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    /// The message input control.
    pub input: String,
    /// The submit control.
    pub submit: String,
    /// Rendered response entries, in document order.
    pub entries: String,
    /// Element carrying the completion marker attribute.
    pub marker: String,
    /// The completion marker attribute name.
    pub marker_attr: String,
    /// Decorative substructures to drop before flattening.
    pub decorative: String,
    /// Element whose text names the currently active target.
    pub target_label: String,
    /// Prefix a target name is appended to when navigating.
    pub base_url: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            input: "textarea".into(),
            submit: r#"button[class*="ChatMessageInputContainer_sendButton"]"#.into(),
            entries: r#"div[class*="ChatMessage_chatMessage"] div[class*="Markdown_markdownContainer"]"#
                .into(),
            marker: r#"div[class*="InfiniteScroll_container"] > div:last-child > div:nth-child(2)"#
                .into(),
            marker_attr: "data-complete".into(),
            decorative: r#"div[class*="MarkdownCodeBlock_codeHeader"]"#.into(),
            target_label: r#"div[class*="ChatHeader_subText"]"#.into(),
            base_url: "https://poe.com/".into(),
        }
    }
}

/// Extraction engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    /// Buffered chunks below this length accumulate instead of flushing,
    /// batching overly-chatty mutation bursts.
    pub flush_threshold: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self { flush_threshold: 10 }
    }
}

/// Resolve the path to the settings file (`~/.chatrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chatrelay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must be valid and within range; invalid values are silently
/// ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    if let Some(v) = read_env_string("CHATRELAY_CONTROL_URL") {
        settings.control.url = v;
    }
    if let Some(v) = read_env_u64("CHATRELAY_HEARTBEAT_SECS", 1, 600) {
        settings.control.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_u64("CHATRELAY_RECONNECT_SECS", 1, 600) {
        settings.control.reconnect_interval_secs = v;
    }
    if let Some(v) = read_env_string("CHATRELAY_CDP_HOST") {
        settings.surface.cdp_host = v;
    }
    if let Some(v) = read_env_u64("CHATRELAY_CDP_PORT", 1, 65535) {
        settings.surface.cdp_port = v as u16;
    }
    if let Some(v) = read_env_u64("CHATRELAY_POLL_MS", 10, 60_000) {
        settings.surface.poll_interval_ms = v;
    }
    if let Some(v) = read_env_u64("CHATRELAY_SETTLE_MS", 0, 10_000) {
        settings.surface.settle_delay_ms = v;
    }
    if let Some(v) = read_env_u64("CHATRELAY_FLUSH_THRESHOLD", 0, 1_000_000) {
        settings.extract.flush_threshold = v as usize;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| (min..=max).contains(v))
}
