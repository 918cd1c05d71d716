use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use orchat_providers::{OPENROUTER_API_BASE_URL, ReasoningEffort, ReasoningParams};
use serde::Deserialize;
use thiserror::Error;

use crate::driver::DEFAULT_IDLE_TIMEOUT;

/// Fallback when the config file names no key.
pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Default, Deserialize)]
pub struct OrchatConfig {
    pub openrouter: Option<OpenRouterConfig>,
    pub reasoning: Option<ReasoningConfig>,
    pub stream: Option<StreamConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid reasoning.effort {0:?} in config")]
    InvalidEffort(String),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::InvalidEffort(_) => None,
        }
    }
}

#[derive(Default, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

// Manual Debug impl to prevent leaking the API key in logs.
impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field(
                "api_key",
                &if self.api_key.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Default reasoning directive for outbound requests.
///
/// Exactly one of `enabled`, `effort`, `max_tokens` should be set; the
/// request builder rejects anything else.
#[derive(Debug, Default, Deserialize)]
pub struct ReasoningConfig {
    pub enabled: Option<bool>,
    pub effort: Option<String>,
    pub max_tokens: Option<u64>,
    /// Ask the provider to reason without returning the reasoning.
    pub exclude: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamConfig {
    /// Seconds to wait for the next byte before failing the run. 0 disables.
    pub idle_timeout_secs: Option<u64>,
    /// Delay between events when replaying fixtures.
    pub replay_delay_ms: Option<u64>,
}

/// Replace `${VAR}` with the value of `VAR` (empty when unset).
///
/// An unclosed `${` or an empty name is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            Some(_) => {
                out.push_str("${}");
                rest = &after[1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl OrchatConfig {
    /// Load `~/.orchat/config.toml`. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Configured key after `${VAR}` expansion, else `$OPENROUTER_API_KEY`.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.openrouter
            .as_ref()
            .and_then(|or| or.api_key.as_deref())
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                env::var(API_KEY_ENV_VAR)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
            })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.openrouter
            .as_ref()
            .and_then(|or| or.base_url.as_deref())
            .map(expand_env_vars)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| OPENROUTER_API_BASE_URL.to_string())
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.openrouter.as_ref().and_then(|or| or.model.as_deref())
    }

    /// Reasoning directive for requests, `None` when the section is absent.
    pub fn reasoning_params(&self) -> Result<Option<ReasoningParams>, ConfigError> {
        let Some(reasoning) = &self.reasoning else {
            return Ok(None);
        };
        let effort = reasoning
            .effort
            .as_deref()
            .map(|raw| {
                ReasoningEffort::parse(raw).ok_or_else(|| ConfigError::InvalidEffort(raw.to_string()))
            })
            .transpose()?;
        Ok(Some(ReasoningParams {
            enabled: reasoning.enabled,
            effort,
            max_tokens: reasoning.max_tokens,
            exclude: reasoning.exclude,
        }))
    }

    /// `None` when disabled with `idle_timeout_secs = 0`.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.stream.as_ref().and_then(|s| s.idle_timeout_secs) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    #[must_use]
    pub fn replay_delay(&self) -> Duration {
        self.stream
            .as_ref()
            .and_then(|s| s.replay_delay_ms)
            .map_or(Duration::ZERO, Duration::from_millis)
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".orchat").join("config.toml"))
}
