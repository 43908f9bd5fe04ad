//! Configuration management for batchsweep using the prefer crate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendSettings;
use crate::models::FetchParams;

/// Items per remote call.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Concurrent batch calls within a pass.
pub const DEFAULT_PARALLEL_COUNT: usize = 10;
/// Wait after a session reset before the next pass.
pub const DEFAULT_COOLDOWN_SECONDS: f64 = 3.0;
/// Pause between two groups.
pub const DEFAULT_INTER_GROUP_DELAY_SECONDS: f64 = 1.0;
/// Items requested per page when fetching a group.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Environment variable overriding `backend.base_url`.
pub const ENV_BASE_URL: &str = "BATCHSWEEP_BASE_URL";
/// Environment variable overriding `backend.token`.
pub const ENV_TOKEN: &str = "BATCHSWEEP_TOKEN";

/// File basenames looked for in the working directory.
const CONFIG_BASENAME: &str = "batchsweep";
const CONFIG_EXTENSIONS: &[&str] = &["toml", "json", "yaml", "yml"];

/// Configuration problems. All of them are reported before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    Duration { field: &'static str, value: f64 },

    #[error("No backend base URL configured (set backend.base_url or {})", ENV_BASE_URL)]
    MissingBaseUrl,

    #[error("Invalid backend base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },
}

/// Engine tuning, fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub parallel_count: usize,
    pub cooldown: Duration,
    pub inter_group_delay: Duration,
    /// Session recoveries allowed per group; `None` retries until done.
    pub max_recoveries: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_count: DEFAULT_PARALLEL_COUNT,
            cooldown: Duration::from_secs_f64(DEFAULT_COOLDOWN_SECONDS),
            inter_group_delay: Duration::from_secs_f64(DEFAULT_INTER_GROUP_DELAY_SECONDS),
            max_recoveries: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero {
                field: "batch_size",
            });
        }
        if self.parallel_count == 0 {
            return Err(ConfigError::Zero {
                field: "parallel_count",
            });
        }
        Ok(())
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::Duration { field, value })
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub batch_size: usize,
    pub parallel_count: usize,
    pub cooldown_seconds: f64,
    pub inter_group_delay_seconds: f64,
    pub max_recoveries: Option<u32>,
    /// Backend base URL; required before anything talks to the backend.
    pub base_url: Option<String>,
    pub groups_path: String,
    pub items_path: String,
    pub operation_path: String,
    pub page_size: usize,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    pub user_agent: String,
    pub token: Option<String>,
    pub token_header: String,
    pub headers: BTreeMap<String, String>,
    pub operation_params: serde_json::Map<String, serde_json::Value>,
    /// Filter parameters forwarded with every item fetch.
    pub fetch_params: FetchParams,
    /// Default exclusion list file.
    pub exclude_file: Option<PathBuf>,
    /// Default per-group item limit.
    pub limit: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        let backend = BackendSettings::default();
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_count: DEFAULT_PARALLEL_COUNT,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            inter_group_delay_seconds: DEFAULT_INTER_GROUP_DELAY_SECONDS,
            max_recoveries: None,
            base_url: None,
            groups_path: backend.groups_path,
            items_path: backend.items_path,
            operation_path: backend.operation_path,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: backend.request_timeout.as_secs(),
            user_agent: backend.user_agent,
            token: None,
            token_header: backend.token_header,
            headers: BTreeMap::new(),
            operation_params: serde_json::Map::new(),
            fetch_params: FetchParams::new(),
            exclude_file: None,
            limit: None,
        }
    }
}

impl Settings {
    /// Validated engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let config = EngineConfig {
            batch_size: self.batch_size,
            parallel_count: self.parallel_count,
            cooldown: seconds("cooldown_seconds", self.cooldown_seconds)?,
            inter_group_delay: seconds("inter_group_delay_seconds", self.inter_group_delay_seconds)?,
            max_recoveries: self.max_recoveries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validated backend connection settings.
    pub fn backend_settings(&self) -> Result<BackendSettings, ConfigError> {
        let base_url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;

        let parsed = url::Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base_url.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::Zero { field: "page_size" });
        }

        Ok(BackendSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            groups_path: self.groups_path.clone(),
            items_path: self.items_path.clone(),
            operation_path: self.operation_path.clone(),
            page_size: self.page_size,
            request_timeout: Duration::from_secs(self.request_timeout),
            user_agent: self.user_agent.clone(),
            token: self.token.clone(),
            token_header: self.token_header.clone(),
            headers: self.headers.clone(),
            operation_params: self.operation_params.clone(),
        })
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|s| !s.is_empty()) {
            tracing::debug!("Using {} from environment: {}", ENV_BASE_URL, url);
            self.base_url = Some(url);
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|s| !s.is_empty()) {
            tracing::debug!("Using {} from environment", ENV_TOKEN);
            self.token = Some(token);
        }
    }
}

/// `[engine]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_group_delay_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_recoveries: Option<u32>,
}

/// `[backend]` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_header: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub operation_params: serde_json::Map<String, serde_json::Value>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub backend: BackendSection,
    /// Filter parameters forwarded with every item fetch.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", alias = "filter")]
    pub fetch_params: FetchParams,
    /// Exclusion list file, relative to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers batchsweep config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load(CONFIG_BASENAME).await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring discovered config: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let mut config = Self::parse(path, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match ext {
            "toml" => toml::from_str(contents).map_err(|e| parse_error(e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| parse_error(e.to_string())),
            _ => serde_json::from_str(contents).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        let engine = &self.engine;
        if let Some(v) = engine.batch_size {
            settings.batch_size = v;
        }
        if let Some(v) = engine.parallel_count {
            settings.parallel_count = v;
        }
        if let Some(v) = engine.cooldown_seconds {
            settings.cooldown_seconds = v;
        }
        if let Some(v) = engine.inter_group_delay_seconds {
            settings.inter_group_delay_seconds = v;
        }
        if engine.max_recoveries.is_some() {
            settings.max_recoveries = engine.max_recoveries;
        }

        let backend = &self.backend;
        if let Some(ref url) = backend.base_url {
            settings.base_url = Some(url.clone());
        }
        if let Some(ref path) = backend.groups_path {
            settings.groups_path = path.clone();
        }
        if let Some(ref path) = backend.items_path {
            settings.items_path = path.clone();
        }
        if let Some(ref path) = backend.operation_path {
            settings.operation_path = path.clone();
        }
        if let Some(v) = backend.page_size {
            settings.page_size = v;
        }
        if let Some(v) = backend.request_timeout {
            settings.request_timeout = v;
        }
        if let Some(ref ua) = backend.user_agent {
            settings.user_agent = ua.clone();
        }
        if let Some(ref token) = backend.token {
            settings.token = Some(token.clone());
        }
        if let Some(ref header) = backend.token_header {
            settings.token_header = header.clone();
        }
        settings
            .headers
            .extend(backend.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        settings.operation_params.extend(
            backend
                .operation_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        settings.fetch_params.extend(
            self.fetch_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(ref file) = self.exclude_file {
            settings.exclude_file = Some(self.resolve_path(file, base_dir));
        }
        if self.limit.is_some() {
            settings.limit = self.limit;
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
}

/// Look for `batchsweep.{toml,json,yaml,yml}` in `dir`.
fn find_config_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", CONFIG_BASENAME, ext)))
        .find(|path| path.exists())
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from the appropriate source based on options.
async fn load_config(options: &LoadOptions) -> Result<Config, ConfigError> {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return Config::load_from_path(config_path).await;
    }

    // Priority 2: Config in the working directory
    if let Some(config_path) = find_config_in(&current_dir()) {
        tracing::debug!("Found config in working directory: {}", config_path.display());
        return Config::load_from_path(&config_path).await;
    }

    // Priority 3: Auto-discover via prefer
    Ok(Config::load().await)
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let config = load_config(&options).await?;
    let mut settings = Settings::default();

    let base_dir = if options.use_cwd {
        current_dir()
    } else {
        config.base_dir().unwrap_or_else(current_dir)
    };

    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(|key| std::env::var(key).ok());

    Ok((settings, config))
}
