//! Configuration management
//!
//! This module handles loading, validation, and management of the Cogtrace
//! configuration. Configuration is stored in TOML format at
//! ~/.cogtrace/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level, deployment environment, data directory, request limits
//! - **cache**: response cache sizing, TTL, salt and key version
//! - **provider**: LLM provider endpoint, model and generation defaults
//! - **resilience**: retry/backoff and circuit breaker tuning
//! - **scaffold**: guided-hint fading parameters
//! - **risk**: risk detector thresholds
//! - **policy**: institutional policy and per-activity overrides
//!
//! # Secrets
//!
//! Secrets never live in the file. The cache salt may come from the
//! `COGTRACE_CACHE_SALT` environment variable (which wins over the file), and
//! the provider API key is read from the variable named by
//! `provider.api_key_env`.
//!
//! # Examples
//!
//! ```no_run
//! use cogtrace_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Environment: {}", config.core.environment);
//! println!("Cache entries: {}", config.cache.max_entries);
//! # Ok(())
//! # }
//! ```

use sdk::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policy::{ActivityPolicy, InstitutionalPolicy};

/// Environment variable that overrides `cache.salt`
pub const CACHE_SALT_ENV: &str = "COGTRACE_CACHE_SALT";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry and circuit breaker settings
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Guided-hint scaffold settings
    #[serde(default)]
    pub scaffold: ScaffoldConfig,

    /// Risk detector thresholds
    #[serde(default)]
    pub risk: RiskThresholds,

    /// Governance policy
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Deployment environment
///
/// Production turns unsafe configuration (such as a missing cache salt) into a
/// startup failure instead of a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// When risk detection runs relative to the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskMode {
    /// Spawned after the response is assembled; the caller does not wait
    #[default]
    Deferred,
    /// Awaited inside `process_interaction`; new risks are returned to the caller
    Synchronous,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Longest prompt accepted, in characters
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Risk detection timing
    #[serde(default)]
    pub risk_mode: RiskMode,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            environment: Environment::default(),
            data_dir: default_data_dir(),
            max_prompt_chars: default_max_prompt_chars(),
            risk_mode: RiskMode::default(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable to always call the provider
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries kept (LRU eviction beyond this)
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Time-to-live for an entry in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Secret salt mixed into every key
    #[serde(default)]
    pub salt: Option<String>,

    /// Key schema version; bump to invalidate all entries
    #[serde(default = "default_cache_version")]
    pub version: String,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// The configured salt, ignoring a blank value
    pub fn effective_salt(&self) -> Option<&str> {
        self.salt.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Production refuses to key an enabled cache without a salt
    pub fn requires_salt(&self, environment: Environment) -> bool {
        environment.is_production() && self.enabled
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
            salt: None,
            version: default_cache_version(),
        }
    }
}

/// Supported provider backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible chat completions endpoint
    #[default]
    OpenAI,
    /// Local Ollama server
    Ollama,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Base URL for the provider API
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_provider_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default completion budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_provider_base_url(),
            model: default_provider_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Retry, timeout and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Attempts per invocation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for a single provider call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Consecutive failed attempts that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl ResilienceConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// Guided-hint fading scaffold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaffoldConfig {
    /// Number of most recent interactions inspected
    #[serde(default = "default_hint_window")]
    pub window: usize,

    /// Hints already given in the session that trigger a degrade
    #[serde(default = "default_hint_limit")]
    pub hint_limit: usize,

    /// Mean ai_involvement over the window that triggers a degrade
    #[serde(default = "default_scaffold_dependency")]
    pub dependency_threshold: f64,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            window: default_hint_window(),
            hint_limit: default_hint_limit(),
            dependency_threshold: default_scaffold_dependency(),
        }
    }
}

/// Risk detector threshold table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Number of most recent traces analysed
    #[serde(default = "default_risk_window")]
    pub window_size: usize,

    /// Mean ai_involvement above which dependency is Medium
    #[serde(default = "default_dependency_medium")]
    pub dependency_medium: f64,

    /// Mean ai_involvement above which dependency is High (or Critical)
    #[serde(default = "default_dependency_high")]
    pub dependency_high: f64,

    /// Session length from which a High dependency may escalate to Critical
    #[serde(default = "default_critical_min_interactions")]
    pub critical_min_interactions: usize,

    /// Design decisions needed before the justification ratio is judged
    #[serde(default = "default_min_decisions")]
    pub min_decisions: usize,

    /// Blocked interactions in the window that raise a governance risk
    #[serde(default = "default_repeated_block_threshold")]
    pub repeated_block_threshold: usize,

    /// Student prompts without any validation/reflection that raise a risk
    #[serde(default = "default_uncritical_prompt_threshold")]
    pub uncritical_prompt_threshold: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            window_size: default_risk_window(),
            dependency_medium: default_dependency_medium(),
            dependency_high: default_dependency_high(),
            critical_min_interactions: default_critical_min_interactions(),
            min_decisions: default_min_decisions(),
            repeated_block_threshold: default_repeated_block_threshold(),
            uncritical_prompt_threshold: default_uncritical_prompt_threshold(),
        }
    }
}

/// Governance policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Institution-wide baseline
    #[serde(default)]
    pub institution: InstitutionalPolicy,

    /// Per-activity overrides keyed by activity id
    #[serde(default)]
    pub activities: BTreeMap<String, ActivityPolicy>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cogtrace")
}

fn default_max_prompt_chars() -> usize {
    8_000
}

fn default_cache_entries() -> usize {
    1_000
}

fn default_cache_ttl() -> u64 {
    3_600
}

fn default_cache_version() -> String {
    "v1".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_provider_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1_024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    4_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_hint_window() -> usize {
    5
}

fn default_hint_limit() -> usize {
    5
}

fn default_scaffold_dependency() -> f64 {
    0.6
}

fn default_risk_window() -> usize {
    20
}

fn default_dependency_medium() -> f64 {
    0.6
}

fn default_dependency_high() -> f64 {
    0.8
}

fn default_critical_min_interactions() -> usize {
    10
}

fn default_min_decisions() -> usize {
    3
}

fn default_repeated_block_threshold() -> usize {
    3
}

fn default_uncritical_prompt_threshold() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            cache: CacheConfig::default(),
            provider: ProviderConfig::default(),
            resilience: ResilienceConfig::default(),
            scaffold: ScaffoldConfig::default(),
            risk: RiskThresholds::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.cogtrace/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
    pub fn load_or_create() -> Result<Self, PipelineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| PipelineError::Config(format!("Failed to write config file: {}", e)))?;

        // Validate after writing so the env salt never lands on disk
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cogtrace/config.toml)
    fn default_config_path() -> Result<PathBuf, PipelineError> {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".cogtrace").join("config.toml"))
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("cogtrace.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and ranged fields
    /// - Applies the `COGTRACE_CACHE_SALT` override
    /// - Rejects a production configuration without a cache salt
    /// - Expands ~ in the data directory
    fn validate_and_process(&mut self) -> Result<(), PipelineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(PipelineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.max_prompt_chars == 0 {
            return Err(PipelineError::Config(
                "max_prompt_chars must be greater than 0".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(PipelineError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }

        if let Ok(salt) = std::env::var(CACHE_SALT_ENV) {
            if !salt.trim().is_empty() {
                self.cache.salt = Some(salt);
            }
        }

        if self.cache.requires_salt(self.core.environment)
            && self.cache.effective_salt().is_none()
        {
            return Err(PipelineError::Config(format!(
                "cache.salt is required in production (set it in the file or via {})",
                CACHE_SALT_ENV
            )));
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(PipelineError::Config(
                "provider.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.resilience.max_attempts == 0 {
            return Err(PipelineError::Config(
                "resilience.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.resilience.failure_threshold == 0 {
            return Err(PipelineError::Config(
                "resilience.failure_threshold must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("scaffold.dependency_threshold", self.scaffold.dependency_threshold),
            ("risk.dependency_medium", self.risk.dependency_medium),
            ("risk.dependency_high", self.risk.dependency_high),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        if self.risk.dependency_medium > self.risk.dependency_high {
            return Err(PipelineError::Config(
                "risk.dependency_medium must not exceed risk.dependency_high".to_string(),
            ));
        }

        self.policy.institution.validate()?;
        for (activity, policy) in &self.policy.activities {
            policy.validate().map_err(|e| {
                PipelineError::Config(format!("policy.activities.{}: {}", activity, e))
            })?;
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, PipelineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PipelineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| PipelineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.core.environment, Environment::Development);
        assert_eq!(config.core.risk_mode, RiskMode::Deferred);
        assert_eq!(config.resilience.max_attempts, 3);
        assert_eq!(config.scaffold.window, 5);
        assert!(config.policy.institution.block_complete_solutions);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.cache.max_entries, deserialized.cache.max_entries);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_toml_str("[core]\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.cache.ttl_secs, 3_600);
        assert_eq!(config.provider.kind, ProviderKind::OpenAI);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::from_toml_str("[core]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_inverted_dependency_thresholds_rejected() {
        let toml = "[core]\n[risk]\ndependency_medium = 0.9\ndependency_high = 0.7\n";
        assert!(Config::from_toml_str(toml).is_err());
    }
}
