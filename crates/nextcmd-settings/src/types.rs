//! Settings schema. Every section deserializes with defaults, so a settings
//! file only needs the keys it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub model: ModelSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    /// Interval between server pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Merge policy knobs for the prediction engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Fixed confidence assigned to every accepted generative candidate.
    pub generative_score: f64,
    /// Continuations requested from the model per prediction.
    pub generative_candidates: usize,
    /// History entries taken from the similarity ranking.
    pub history_top_k: usize,
    /// Budget for the generative call before falling back to history only.
    pub generative_timeout_ms: u64,
    /// Smallest word n-gram used by the lexical scorer.
    pub ngram_min: usize,
    /// Largest word n-gram used by the lexical scorer.
    pub ngram_max: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generative_score: 0.8,
            generative_candidates: 3,
            history_top_k: 3,
            generative_timeout_ms: 1500,
            ngram_min: 1,
            ngram_max: 3,
        }
    }
}

/// Generative model endpoint (OpenAI-compatible `/v1/completions`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// When false, predictions come from history only.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Bearer token. Read from file or env, never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Per-HTTP-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    /// Consecutive failures before the circuit opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8080".to_string(),
            model: "microsoft/CodeGPT-small-py".to_string(),
            api_key: None,
            max_tokens: 50,
            temperature: 0.7,
            request_timeout_ms: 5000,
            max_retries: 1,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_ms: 30_000,
        }
    }
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field("circuit_breaker_cooldown_ms", &self.circuit_breaker_cooldown_ms)
            .finish()
    }
}

/// Command history database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Absolute, or relative to the nextcmd home directory.
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "commands.db".to_string(),
        }
    }
}

impl StoreSettings {
    pub fn resolve_db_path(&self, home: &Path) -> PathBuf {
        let path = PathBuf::from(&self.db_path);
        if path.is_absolute() {
            path
        } else {
            home.join(path)
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"nextcmd_proposer": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}
