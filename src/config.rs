//! Structured configuration, loaded from a YAML file and overridden by
//! `HLCS_`-prefixed environment variables (upper-snake-case key path), per
//! §6. Generalized from the teacher's hardcoded `AgencyConfig` default
//! struct (`rust_agency::main::AgencyConfig`) into a loaded, overridable one.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusDefaults {
    pub consensus_type: String,
    pub deadline_ms: u64,
    pub role_weights: RoleWeights,
}

impl Default for ConsensusDefaults {
    fn default() -> Self {
        Self {
            consensus_type: "adaptive".to_string(),
            deadline_ms: 60_000,
            role_weights: RoleWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleWeights {
    pub primary_user: f64,
    pub administrator: f64,
    pub autonomous_agent: f64,
    pub observer: f64,
}

impl Default for RoleWeights {
    fn default() -> Self {
        Self { primary_user: 0.60, administrator: 0.30, autonomous_agent: 0.10, observer: 0.00 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self { url: "http://127.0.0.1:8088".to_string(), timeout_ms: 10_000, retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalReasonerConfig {
    pub enabled: bool,
}

impl Default for LocalReasonerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub tool_server: ToolServerConfig,
    pub local_reasoner: LocalReasonerConfig,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self { tool_server: ToolServerConfig::default(), local_reasoner: LocalReasonerConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub persist_dir: String,
    pub stm_ttl_hours: u64,
    pub ltm_promotion_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { persist_dir: "./hlcs-data/memory".to_string(), stm_ttl_hours: 24, ltm_promotion_threshold: 0.75 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlagConfig {
    pub enabled: bool,
    #[serde(default)]
    pub rollout_percentage: u8,
    #[serde(default = "default_flag_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

fn default_flag_strategy() -> String {
    "ALL".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_address: String,
    pub request_timeout_ms: u64,
    pub max_concurrent_requests: usize,
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub complexity_threshold: f64,
    pub strategy_default: String,
    pub consensus_defaults: ConsensusDefaults,
    pub backends: BackendsConfig,
    pub memory: MemoryConfig,
    pub feature_flags: HashMap<String, FeatureFlagConfig>,
    pub participant_registry_path: String,
    pub feature_flags_path: String,
    pub max_step_attempts: u32,
    pub max_ensemble_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
            max_concurrent_requests: 256,
            quality_threshold: 0.7,
            max_iterations: 3,
            complexity_threshold: 0.5,
            strategy_default: "adaptive".to_string(),
            consensus_defaults: ConsensusDefaults::default(),
            backends: BackendsConfig::default(),
            memory: MemoryConfig::default(),
            feature_flags: HashMap::new(),
            participant_registry_path: "./hlcs-data/participants.json".to_string(),
            feature_flags_path: "./hlcs-data/feature_flags.json".to_string(),
            max_step_attempts: 2,
            max_ensemble_concurrency: 4,
        }
    }
}

const ENV_PREFIX: &str = "HLCS_";

impl Config {
    /// Load a config file if present, then apply `HLCS_`-prefixed env overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| AppError::invalid_input(format!("reading config file: {e}")))?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| AppError::invalid_input(format!("parsing config file: {e}")))?
            }
            _ => Config::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Apply simple scalar overrides for the top-level keys named in §6.
    /// Nested keys follow `HLCS_SECTION_FIELD` (e.g. `HLCS_BACKENDS_TOOL_SERVER_URL`).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LISTEN_ADDRESS")) {
            self.listen_address = v;
        }
        if let Ok(v) = env_parse::<u64>("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = v;
        }
        if let Ok(v) = env_parse::<usize>("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = v;
        }
        if let Ok(v) = env_parse::<f64>("QUALITY_THRESHOLD") {
            self.quality_threshold = v;
        }
        if let Ok(v) = env_parse::<u32>("MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Ok(v) = env_parse::<f64>("COMPLEXITY_THRESHOLD") {
            self.complexity_threshold = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}STRATEGY_DEFAULT")) {
            self.strategy_default = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}BACKENDS_TOOL_SERVER_URL")) {
            self.backends.tool_server.url = v;
        }
        if let Ok(v) = env_parse::<bool>("BACKENDS_LOCAL_REASONER_ENABLED") {
            self.backends.local_reasoner.enabled = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}MEMORY_PERSIST_DIR")) {
            self.memory.persist_dir = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<T, ()> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok().and_then(|v| v.parse().ok()).ok_or(())
}
