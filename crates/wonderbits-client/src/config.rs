//! Client configuration – reads `~/.wonderbits/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wonderbits_types::WbError;

/// Connection settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the companion process.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// How long a query or action waits for its reply.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Reconnect automatically after the link drops.
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,

    /// First reconnect delay; doubled after every failed attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the reconnect delay.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_endpoint() -> String {
    "ws://localhost:8082".to_string()
}
fn default_call_timeout_ms() -> u64 {
    3000
}
fn default_reconnect() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    500
}
fn default_reconnect_max_delay_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            call_timeout_ms: default_call_timeout_ms(),
            reconnect: default_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Reconnect schedule, or `None` when reconnection is disabled.
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.reconnect.then(|| ReconnectPolicy {
            initial: Duration::from_millis(self.reconnect_delay_ms.max(1)),
            max: Duration::from_millis(
                self.reconnect_max_delay_ms.max(self.reconnect_delay_ms.max(1)),
            ),
        })
    }

    /// Parse a configuration from TOML text. Missing keys take their
    /// defaults; environment overrides are not applied.
    pub fn from_toml_str(raw: &str) -> Result<Self, WbError> {
        toml::from_str(raw).map_err(|e| WbError::Config(format!("failed to parse config: {e}")))
    }

    /// Defaults, overlaid with `~/.wonderbits/config.toml` if present, then
    /// with `WONDERBITS_*` environment overrides.
    pub fn resolve() -> Result<Self, WbError> {
        let mut cfg = match load()? {
            Some(cfg) => cfg,
            None => {
                let mut cfg = Self::default();
                apply_env_overrides(&mut cfg);
                cfg
            }
        };
        if cfg.endpoint.trim().is_empty() {
            cfg.endpoint = default_endpoint();
        }
        Ok(cfg)
    }
}

/// Exponential reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    /// Delay to wait before the attempt following one that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Return the path to `~/.wonderbits/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".wonderbits").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<ClientConfig>, WbError> {
    load_from(&config_path())
}

/// Load the config from a specific path, applying environment overrides.
pub fn load_from(path: &Path) -> Result<Option<ClientConfig>, WbError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        WbError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg = ClientConfig::from_toml_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `WONDERBITS_*` environment variable overrides to `cfg`.
///
/// Unparsable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `WONDERBITS_ENDPOINT` | `endpoint` |
/// | `WONDERBITS_CALL_TIMEOUT_MS` | `call_timeout_ms` |
/// | `WONDERBITS_RECONNECT` | `reconnect` (`true`/`false`/`1`/`0`) |
pub fn apply_env_overrides(cfg: &mut ClientConfig) {
    if let Ok(v) = std::env::var("WONDERBITS_ENDPOINT")
        && !v.trim().is_empty()
    {
        cfg.endpoint = v;
    }
    if let Ok(v) = std::env::var("WONDERBITS_CALL_TIMEOUT_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.call_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("WONDERBITS_RECONNECT")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.reconnect = flag;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
