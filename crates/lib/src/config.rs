//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.supportdesk/config.json`) and environment.
//! Every field has a default, so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend location and the customer the console acts for.
    #[serde(default)]
    pub api: ApiConfig,

    /// Message load retry policy.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Typing reveal of agent replies.
    #[serde(default)]
    pub typing: TypingConfig,

    /// Local chat history cache.
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Backend base URL (default "http://localhost:8000"). Overridden by SUPPORTDESK_API_BASE env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Customer selected at startup when no `--customer` is given.
    #[serde(default)]
    pub customer_id: Option<i64>,
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            customer_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Total attempts for a message load before giving up (default 3).
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,

    /// Delay before the first retry; doubles on each further attempt (default 500 ms).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_load_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            load_attempts: default_load_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl SyncConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingConfig {
    /// When false, agent replies are shown in full at once.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause after a plain word (default 40 ms).
    #[serde(default = "default_word_delay_ms")]
    pub word_delay_ms: u64,

    /// Pause after a word ending in punctuation (default 250 ms).
    #[serde(default = "default_punctuation_delay_ms")]
    pub punctuation_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_word_delay_ms() -> u64 {
    40
}

fn default_punctuation_delay_ms() -> u64 {
    250
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            word_delay_ms: default_word_delay_ms(),
            punctuation_delay_ms: default_punctuation_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Cache confirmed messages locally so a conversation shows instantly on selection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// History file. Relative paths are resolved against the config file's parent. Default: `history.json` next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Resolve the backend base URL: env SUPPORTDESK_API_BASE overrides config.
pub fn resolve_api_base(config: &Config) -> String {
    std::env::var("SUPPORTDESK_API_BASE")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.api.base_url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SUPPORTDESK_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".supportdesk").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or SUPPORTDESK_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the history file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolve the history file: `history.path` if set (relative paths against the config file's parent), otherwise `history.json` beside the config.
pub fn resolve_history_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.history.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("history.json"),
    }
}
