//! Configuration management for biograph.
//!
//! Settings are resolved once at startup from (in priority order):
//! 1. Environment variables (`BIOGRAPH_` prefix, `__` between section and key,
//!    e.g. `BIOGRAPH_NEO4J__URI`, `BIOGRAPH_MODEL__TEMPERATURE`)
//! 2. Config file (`biograph.toml`, sections `[neo4j]`, `[model]`, `[context]`)
//! 3. Defaults
//!
//! The resolved [`Settings`] value is never mutated afterwards; components
//! receive it by reference or behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BIOGRAPH";

/// Default config file name (without extension).
pub const DEFAULT_CONFIG_FILE: &str = "biograph";

const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_GRAPH_INDEX: &str = "entity_names";
const DEFAULT_GRAPH_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_MODEL_TIMEOUT_SECS: f64 = 60.0;
const DEFAULT_CONTEXT_LIMIT: usize = 25;

/// Which model backend serves generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelProvider {
    /// OpenAI-compatible chat completions API.
    #[default]
    OpenAi,
    /// A llama.cpp server (`llama-server`) hosting a local GGUF model.
    LlamaCpp,
}

impl ModelProvider {
    /// Base URL used when none is configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::LlamaCpp => "http://localhost:8080",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::LlamaCpp => "llamacpp",
        }
    }
}

impl FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "llamacpp" | "llama.cpp" | "llama-cpp" => Ok(Self::LlamaCpp),
            other => Err(format!("unknown provider '{other}' (expected openai or llamacpp)")),
        }
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation length cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokens {
    Limited(u32),
    Unbounded,
}

impl MaxTokens {
    /// The cap to send to the provider, `None` when unbounded.
    pub fn limit(&self) -> Option<u32> {
        match self {
            Self::Limited(n) => Some(*n),
            Self::Unbounded => None,
        }
    }
}

impl FromStr for MaxTokens {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if matches!(s.to_lowercase().as_str(), "unbounded" | "none" | "null") {
            return Ok(Self::Unbounded);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("must be a positive integer or 'unbounded'".to_string()),
            Ok(n) => Ok(Self::Limited(n)),
            Err(_) => Err(format!("'{s}' is not a positive integer or 'unbounded'")),
        }
    }
}

/// What the pipeline does when graph retrieval fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextPolicy {
    /// Log the failure and answer without graph context.
    #[default]
    Degrade,
    /// Fail the query with the graph error.
    Fatal,
}

impl FromStr for ContextPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown policy '{other}' (expected degrade or fatal)")),
        }
    }
}

/// Immutable runtime configuration.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    /// Full-text index queried for context retrieval.
    pub graph_index: String,
    /// Upper bound on a single graph round-trip.
    pub graph_timeout: Duration,

    pub provider: ModelProvider,
    pub model_name: String,
    pub model_base_url: String,
    pub api_key: Option<String>,
    /// Sampling temperature, validated to 0.0–2.0.
    pub temperature: f32,
    pub max_tokens: MaxTokens,
    pub max_retries: u32,
    /// Upper bound on a model request (per chunk when streaming).
    pub model_timeout: Duration,

    pub context_policy: ContextPolicy,
    /// Maximum number of facts placed in one prompt.
    pub context_limit: usize,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("graph_uri", &self.graph_uri)
            .field("graph_user", &self.graph_user)
            .field("graph_password", &"***")
            .field("graph_index", &self.graph_index)
            .field("graph_timeout", &self.graph_timeout)
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("model_base_url", &self.model_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("model_timeout", &self.model_timeout)
            .field("context_policy", &self.context_policy)
            .field("context_limit", &self.context_limit)
            .finish()
    }
}

impl Settings {
    /// Resolve settings from `biograph.toml` (optional) and `BIOGRAPH_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Resolve settings using a different config file prefix.
    pub fn load_from(file_prefix: &str) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(&cfg)
    }

    /// Resolve settings from an explicit variable map instead of the process
    /// environment. Keys use the same names as the real variables.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()?;
        Self::from_config(&cfg)
    }

    fn from_config(cfg: &config::Config) -> Result<Self, ConfigError> {
        let provider = match optional(cfg, "model.provider")? {
            Some(raw) => parse::<ModelProvider>("model.provider", &raw)?,
            None => ModelProvider::default(),
        };

        let api_key = optional(cfg, "model.api_key")?;
        if provider == ModelProvider::OpenAi && api_key.is_none() {
            return Err(ConfigError::Missing {
                key: "model.api_key".to_string(),
            });
        }

        let temperature = match optional(cfg, "model.temperature")? {
            Some(raw) => parse::<f32>("model.temperature", &raw)?,
            None => DEFAULT_TEMPERATURE,
        };
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::invalid(
                "model.temperature",
                format!("{temperature} is outside 0.0-2.0"),
            ));
        }

        let context_limit = match optional(cfg, "context.limit")? {
            Some(raw) => parse::<usize>("context.limit", &raw)?,
            None => DEFAULT_CONTEXT_LIMIT,
        };
        if context_limit == 0 {
            return Err(ConfigError::invalid("context.limit", "must be at least 1"));
        }

        let settings = Self {
            graph_uri: required(cfg, "neo4j.uri")?,
            graph_user: required(cfg, "neo4j.user")?,
            graph_password: required(cfg, "neo4j.password")?,
            graph_index: optional(cfg, "neo4j.index")?
                .unwrap_or_else(|| DEFAULT_GRAPH_INDEX.to_string()),
            graph_timeout: duration(cfg, "neo4j.timeout_secs", DEFAULT_GRAPH_TIMEOUT_SECS)?,
            provider,
            model_name: required(cfg, "model.name")?,
            model_base_url: optional(cfg, "model.base_url")?
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key,
            temperature,
            max_tokens: match optional(cfg, "model.max_tokens")? {
                Some(raw) => parse::<MaxTokens>("model.max_tokens", &raw)?,
                None => MaxTokens::Limited(DEFAULT_MAX_TOKENS),
            },
            max_retries: match optional(cfg, "model.max_retries")? {
                Some(raw) => parse::<u32>("model.max_retries", &raw)?,
                None => DEFAULT_MAX_RETRIES,
            },
            model_timeout: duration(cfg, "model.timeout_secs", DEFAULT_MODEL_TIMEOUT_SECS)?,
            context_policy: match optional(cfg, "context.policy")? {
                Some(raw) => parse::<ContextPolicy>("context.policy", &raw)?,
                None => ContextPolicy::default(),
            },
            context_limit,
        };

        tracing::debug!(settings = ?settings, "Settings resolved");
        Ok(settings)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

/// Read a key, treating absent and blank values alike.
fn optional(cfg: &config::Config, key: &str) -> Result<Option<String>, ConfigError> {
    match cfg.get_string(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_string())),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(ConfigError::Source(e)),
    }
}

fn required(cfg: &config::Config, key: &str) -> Result<String, ConfigError> {
    optional(cfg, key)?.ok_or_else(|| ConfigError::Missing {
        key: key.to_string(),
    })
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}")))
}

fn duration(cfg: &config::Config, key: &str, default_secs: f64) -> Result<Duration, ConfigError> {
    let secs = match optional(cfg, key)? {
        Some(raw) => parse::<f64>(key, &raw)?,
        None => default_secs,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(key, "must be a positive number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid(key, e.to_string()))
}
