// Local configuration for the sync engine.
//
// Global config: `~/.huddle/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root directory for Huddle global state: `~/.huddle/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".huddle"))
}

/// Path to the global config file: `~/.huddle/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Engine config ──────────────────────────────────────────────────

/// Engine configuration at `~/.huddle/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Relay WebSocket URL (e.g. `wss://relay.huddle.dev/v1/ws`).
    pub relay_url: Option<String>,
    /// HTTP API base URL, used by the SSE fallback transport.
    pub api_url: Option<String>,
    /// Bearer token for the relay session.
    pub auth_token: Option<String>,
    /// Display name announced in presence.
    pub display_name: Option<String>,
    pub reconnect: ReconnectSettings,
    pub analytics: AnalyticsSettings,
    pub presence: PresenceSettings,
    pub publishing: PublishingSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_url: None,
            auth_token: None,
            display_name: None,
            reconnect: ReconnectSettings::default(),
            analytics: AnalyticsSettings::default(),
            presence: PresenceSettings::default(),
            publishing: PublishingSettings::default(),
        }
    }
}

/// Reconnection backoff knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 30_000, max_attempts: 3 }
    }
}

/// Analytics coalescing knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Buffered updates are flushed at least this often.
    pub flush_interval_ms: u64,
    /// A full buffer flushes immediately.
    pub max_batch: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self { flush_interval_ms: 1_000, max_batch: 10 }
    }
}

/// Presence staleness knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceSettings {
    /// Records with no activity for this long are marked offline.
    pub stale_after_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self { stale_after_secs: 300 }
    }
}

/// Publishing correlation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishingSettings {
    /// How long `start_publishing` waits for the first matching job update.
    pub correlate_timeout_secs: u64,
}

impl Default for PublishingSettings {
    fn default() -> Self {
        Self { correlate_timeout_secs: 10 }
    }
}

impl EngineConfig {
    /// Load from `~/.huddle/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect.max_delay_ms)
    }

    pub fn analytics_flush_interval(&self) -> Duration {
        Duration::from_millis(self.analytics.flush_interval_ms)
    }

    pub fn presence_stale_after(&self) -> Duration {
        Duration::from_secs(self.presence.stale_after_secs)
    }

    pub fn publish_correlate_timeout(&self) -> Duration {
        Duration::from_secs(self.publishing.correlate_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[source] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[source] toml::ser::Error),
}
