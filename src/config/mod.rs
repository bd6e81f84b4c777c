//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RikkiError};
use crate::util::retry::RetryPolicy;

/// Engine-wide settings.
///
/// Resolution order:
/// 1. Fields set in code on the returned value
/// 2. `RIKKI_*` environment variables (a `.env` file is loaded first if present)
/// 3. `~/.rikki/config.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub tools: ToolConfig,
    pub stream: StreamConfig,
    pub turn: TurnConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 4,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_delay_ms),
            max_backoff: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Per tool call.
    pub timeout_ms: u64,
    /// Bytes of command output kept in a tool result.
    pub output_preview_chars: usize,
    pub default_shell: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            output_preview_chars: 30_000,
            default_shell: None,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub doom_loop_threshold: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            doom_loop_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the default config file if it exists, then the environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RikkiError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| RikkiError::Configuration(e.to_string()))
    }

    /// `~/.rikki/config.toml`.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".rikki"))
            .unwrap_or_else(|| PathBuf::from(".rikki"))
            .join("config.toml")
    }

    /// Overlay `RIKKI_*` variables, loading `.env` first if present.
    pub fn apply_env(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = parse_var(&lookup, "RIKKI_RETRY_INITIAL_DELAY_MS")? {
            self.retry.initial_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_RETRY_BACKOFF_FACTOR")? {
            self.retry.backoff_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_TOOL_TIMEOUT_MS")? {
            self.tools.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_TOOL_OUTPUT_PREVIEW_CHARS")? {
            self.tools.output_preview_chars = v;
        }
        if let Some(shell) = lookup("RIKKI_DEFAULT_SHELL").filter(|s| !s.trim().is_empty()) {
            self.tools.default_shell = Some(shell);
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_STREAM_IDLE_TIMEOUT_MS")? {
            self.stream.idle_timeout_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "RIKKI_DOOM_LOOP_THRESHOLD")? {
            self.turn.doom_loop_threshold = v;
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| RikkiError::Configuration(format!("{name}={raw}: {e}")))
}
