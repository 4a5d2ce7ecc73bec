//! Configuration module for Decksync
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `DECKSYNC__` using `__` as the section
//! separator (e.g. `DECKSYNC__JOBS__MAX_RETRIES=5`).

use ::config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::RetryPolicy;

const ENV_PREFIX: &str = "DECKSYNC";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub repositories: RepositoriesConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => get_data_dir().join("decksync.db"),
        }
    }

    /// Connection string handed to the pool
    pub fn url(&self) -> String {
        let path = self.get_path();
        let path = path.to_string_lossy();
        if path.starts_with("sqlite:") {
            path.into_owned()
        } else {
            format!("sqlite://{}", path)
        }
    }
}

/// Where repositories are cloned
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoriesConfig {
    pub cache_dir: Option<String>,
}

impl RepositoriesConfig {
    pub fn get_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => get_data_dir().join("repositories"),
        }
    }
}

/// Manifest rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Helm binary; looked up on PATH when unset
    pub helm_binary: Option<String>,

    #[serde(default = "default_release_name")]
    pub release_name: String,
}

fn default_release_name() -> String {
    "decksync".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            helm_binary: None,
            release_name: default_release_name(),
        }
    }
}

/// Job runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_workers() -> usize {
    2
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            workers: default_workers(),
        }
    }
}

impl JobsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
        }
    }
}

/// Get the data directory for Decksync
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("decksync"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".decksync")))
        .unwrap_or_else(|| PathBuf::from(".decksync"))
}

/// Get the config directory for Decksync
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("decksync"))
        .unwrap_or_else(get_data_dir)
}

pub fn default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Load configuration from defaults, an optional file and the environment.
///
/// An explicitly given file must exist; the default location is optional.
pub fn load_config(file: Option<&Path>) -> Result<Config, ConfigError> {
    let defaults = toml::to_string(&Config::default())
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    let mut builder =
        ::config::Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

    builder = match file {
        Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml)),
        None => builder.add_source(
            File::from(default_config_path())
                .format(FileFormat::Toml)
                .required(false),
        ),
    };

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Save configuration to the default location
pub fn save_config(config: &Config) -> std::io::Result<PathBuf> {
    let config_dir = get_config_dir();
    std::fs::create_dir_all(&config_dir)?;

    let config_path = default_config_path();
    let contents = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&config_path, contents)?;

    Ok(config_path)
}
