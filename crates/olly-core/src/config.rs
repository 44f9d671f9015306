//! Configuration system for OllyStack
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use crate::anomaly::AnomalyConfig;
use crate::correlation_id::{CorrelationId, DEFAULT_ID_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllyConfig {
    pub server: ServerSettings,

    /// Correlation id resolution
    pub correlation: CorrelationSettings,

    /// Attribute cardinality limits
    pub cardinality: CardinalitySettings,

    /// Metric anomaly thresholds
    pub anomaly: AnomalyConfig,

    /// Context query engine
    pub query: QuerySettings,

    /// Root-cause analysis
    pub rca: RcaSettings,

    /// Optional LLM narrator
    pub narrator: NarratorSettings,

    pub storage: StorageSettings,

    pub web: WebSettings,
}

/// Process-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Log format: text or json
    pub log_format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

/// Correlation id resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    /// Prefix for derived and generated ids
    pub id_prefix: String,

    /// Attribute the id is written to
    pub attribute_name: String,

    /// Baggage member carrying the id
    pub baggage_key: String,

    /// Header names checked for an explicit id, in order
    pub header_names: Vec<String>,

    /// Look for the id in W3C baggage
    pub extract_from_baggage: bool,

    /// Derive the id from the trace id when none is carried
    pub derive_from_trace_id: bool,

    /// Generate a random id when nothing else applies
    pub generate_if_missing: bool,

    /// Also write the id into resource attributes
    pub propagate_to_resource: bool,

    /// Search JSON log bodies for an id
    pub search_log_body: bool,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            attribute_name: "correlation_id".to_string(),
            baggage_key: "correlation_id".to_string(),
            header_names: vec![
                "X-Correlation-ID".to_string(),
                "X-Request-ID".to_string(),
                "correlation-id".to_string(),
                "request-id".to_string(),
            ],
            extract_from_baggage: true,
            derive_from_trace_id: true,
            generate_if_missing: true,
            propagate_to_resource: false,
            search_log_body: true,
        }
    }
}

/// Cardinality guard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardinalitySettings {
    /// Enable the guard
    pub enabled: bool,

    /// Default distinct-value cap per attribute
    pub max_values_per_attribute: usize,

    /// Sliding window length (seconds)
    pub window_secs: u64,

    /// Interval between background sweeps (seconds)
    pub sweep_interval_secs: u64,

    /// Attributes passed through the guard
    pub bounded_attributes: Vec<String>,

    /// Per-attribute cap overrides; 0 means never allowed
    pub limits: HashMap<String, usize>,

    /// Attributes always removed
    pub drop_attributes: Vec<String>,

    /// Template path parameters out of URL attributes before guarding
    pub normalize_urls: bool,
}

impl Default for CardinalitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_values_per_attribute: 10_000,
            window_secs: 3600,
            sweep_interval_secs: 60,
            bounded_attributes: vec![
                "http.route".to_string(),
                "http.target".to_string(),
                "url.path".to_string(),
                "http.url".to_string(),
                "user.id".to_string(),
            ],
            limits: HashMap::new(),
            drop_attributes: vec![
                "password".to_string(),
                "token".to_string(),
                "secret".to_string(),
                "api_key".to_string(),
            ],
            normalize_urls: true,
        }
    }
}

/// Query engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Overall budget for the storage fan-out (ms)
    pub timeout_ms: u64,

    /// Context cache TTL (seconds); 0 disables caching
    pub cache_ttl_secs: u64,

    /// Maximum cached contexts
    pub cache_max_entries: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
        }
    }
}

/// Root-cause analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RcaSettings {
    /// Number of time buckets the context is split into
    pub bucket_count: usize,

    /// Minimum score for a conclusive result
    pub confidence_threshold: f64,

    /// Weight of the causal-effect confidence in the final score
    pub causal_weight: f64,

    /// Weight of the event-chain strength in the final score
    pub chain_weight: f64,

    /// Events further apart than this are never linked (ms)
    pub max_lookback_ms: u64,

    /// Temporal decay constant (ms)
    pub temporal_decay_ms: u64,

    /// Dependency factor for services without a shared edge
    pub dependency_epsilon: f64,
}

impl Default for RcaSettings {
    fn default() -> Self {
        Self {
            bucket_count: 12,
            confidence_threshold: 0.5,
            causal_weight: 0.6,
            chain_weight: 0.4,
            max_lookback_ms: 30_000,
            temporal_decay_ms: 5_000,
            dependency_epsilon: 0.1,
        }
    }
}

/// LLM narrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorSettings {
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,

    pub model: String,

    /// Bearer token
    pub api_key: Option<String>,

    /// Per-call timeout (ms)
    pub timeout_ms: u64,

    pub max_tokens: u32,
}

impl Default for NarratorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_ms: 3000,
            max_tokens: 400,
        }
    }
}

/// In-memory store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Record retention (seconds); 0 keeps records forever
    pub retention_secs: u64,

    /// JSONL files loaded through the ingest pipeline at startup
    pub data_files: Vec<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention_secs: 86_400,
            data_files: Vec::new(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    /// Enable the HTTP API
    pub enabled: bool,

    /// Host to bind
    pub host: String,

    /// Port to bind
    pub port: u16,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. OLLY_CONFIG environment variable
    /// 3. ~/.config/ollystack/config.toml
    /// 4. /etc/ollystack/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<OllyConfig> {
        let config_path = self.find_config_file();

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            OllyConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("OLLY_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("OLLY_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/ollystack/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<OllyConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: OllyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut OllyConfig) {
        if let Ok(val) = std::env::var("OLLY_LOG_LEVEL") {
            config.server.log_level = val;
        }

        if let Ok(val) = std::env::var("OLLY_WEB_PORT") {
            if let Ok(port) = val.parse() {
                config.web.port = port;
            }
        }
        if let Ok(val) = std::env::var("OLLY_WEB_HOST") {
            config.web.host = val;
        }

        if let Ok(val) = std::env::var("OLLY_ID_PREFIX") {
            config.correlation.id_prefix = val;
        }

        if let Ok(val) = std::env::var("OLLY_QUERY_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.query.timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("OLLY_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.query.cache_ttl_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("OLLY_NARRATOR_ENDPOINT") {
            config.narrator.endpoint = val;
        }
        if let Ok(val) = std::env::var("OLLY_NARRATOR_API_KEY") {
            config.narrator.api_key = Some(val);
            config.narrator.enabled = true;
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &OllyConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.server.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.server.log_level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&config.server.log_format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                config.server.log_format, valid_formats
            )));
        }

        let prefix = &config.correlation.id_prefix;
        if CorrelationId::parse(prefix).is_err() || prefix.starts_with('-') || prefix.ends_with('-') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid id prefix: {:?}",
                config.correlation.id_prefix
            )));
        }
        if config.correlation.attribute_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "Correlation attribute name cannot be empty".to_string(),
            ));
        }
        if config.correlation.extract_from_baggage && config.correlation.baggage_key.is_empty() {
            return Err(ConfigError::ValidationError(
                "Baggage key cannot be empty".to_string(),
            ));
        }

        if config.cardinality.enabled && config.cardinality.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Cardinality window cannot be 0".to_string(),
            ));
        }

        if config.query.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Query timeout cannot be 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&config.rca.confidence_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "Confidence threshold must be within [0, 1], got {}",
                config.rca.confidence_threshold
            )));
        }
        if config.rca.bucket_count < 2 {
            return Err(ConfigError::ValidationError(
                "RCA bucket count must be at least 2".to_string(),
            ));
        }
        if config.rca.temporal_decay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Temporal decay cannot be 0".to_string(),
            ));
        }

        if config.narrator.enabled && config.narrator.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Narrator timeout cannot be 0".to_string(),
            ));
        }

        if config.web.port == 0 {
            return Err(ConfigError::ValidationError(
                "Web port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &OllyConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ollystack").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(target_os = "windows"))]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = OllyConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.correlation.id_prefix, "olly");
        assert_eq!(config.correlation.baggage_key, "correlation_id");
        assert_eq!(config.cardinality.max_values_per_attribute, 10_000);
        assert_eq!(config.query.cache_ttl_secs, 300);
        assert_eq!(config.rca.confidence_threshold, 0.5);
        assert!(!config.narrator.enabled);
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [server]
            log_level = "debug"
        "#;
        let config: OllyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.query.timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [server]
            log_level = "trace"
            log_format = "json"

            [correlation]
            id_prefix = "shop"
            header_names = ["X-Correlation-ID"]
            propagate_to_resource = true

            [cardinality]
            max_values_per_attribute = 500
            window_secs = 600
            limits = { "http.route" = 100, "user.id" = 0 }

            [anomaly]
            z_threshold = 2.5

            [query]
            timeout_ms = 2000

            [rca]
            confidence_threshold = 0.6

            [narrator]
            enabled = true
            model = "llama3"

            [web]
            port = 9090
        "#;

        let config: OllyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.correlation.id_prefix, "shop");
        assert_eq!(config.correlation.header_names, vec!["X-Correlation-ID"]);
        assert!(config.correlation.propagate_to_resource);
        assert_eq!(config.cardinality.limits.get("user.id"), Some(&0));
        assert_eq!(config.cardinality.limits.get("http.route"), Some(&100));
        assert_eq!(config.anomaly.z_threshold, 2.5);
        assert_eq!(config.anomaly.score_threshold, 0.7);
        assert_eq!(config.query.timeout_ms, 2000);
        assert_eq!(config.rca.confidence_threshold, 0.6);
        assert_eq!(config.rca.bucket_count, 12);
        assert!(config.narrator.enabled);
        assert_eq!(config.web.port, 9090);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = OllyConfig {
            server: ServerSettings {
                log_level: "invalid".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_prefix_and_threshold() {
        let mut config = OllyConfig::default();
        config.correlation.id_prefix = "bad;prefix".to_string();
        assert!(ConfigLoader::new().validate(&config).is_err());

        let mut config = OllyConfig::default();
        config.rca.confidence_threshold = 1.5;
        assert!(ConfigLoader::new().validate(&config).is_err());

        let mut config = OllyConfig::default();
        config.query.timeout_ms = 0;
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_dash_edged_prefix() {
        let loader = ConfigLoader::new();
        for prefix in ["olly-", "-olly", "-"] {
            let mut config = OllyConfig::default();
            config.correlation.id_prefix = prefix.to_string();
            assert!(loader.validate(&config).is_err(), "prefix {prefix:?} accepted");
        }

        let mut config = OllyConfig::default();
        config.correlation.id_prefix = "my-shop".to_string();
        assert!(loader.validate(&config).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[web]\nport = 9191").unwrap();

        let loader = ConfigLoader::new();
        let config = loader.load_from_file(file.path()).unwrap();
        assert_eq!(config.web.port, 9191);

        let missing = loader.load_from_file(Path::new("/nonexistent/ollystack.toml"));
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = OllyConfig::default();
        config.correlation.id_prefix = "shop".to_string();
        config.cardinality.limits.insert("http.route".to_string(), 50);

        let loader = ConfigLoader::new();
        loader.save(&config, &path).unwrap();
        let loaded = loader.load_from_file(&path).unwrap();
        assert_eq!(loaded.correlation.id_prefix, "shop");
        assert_eq!(loaded.cardinality.limits.get("http.route"), Some(&50));
    }
}
