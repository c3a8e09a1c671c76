//! Configuration loading and data folder resolution
//!
//! Bootstrap settings live in a single TOML file. Every value has a built-in
//! default, so a missing file is a warning and never a startup failure.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CHARTMETA_CONFIG";

/// Environment variable naming the data folder (datasets, checkpoints, corrections)
pub const DATA_FOLDER_ENV_VAR: &str = "CHARTMETA_DATA_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding datasets, checkpoints and the correction log
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Lookup service credentials
    #[serde(default)]
    pub spotify: SpotifyConfig,

    /// Traversal settings
    #[serde(default)]
    pub run: RunConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Spotify Web API client credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// ISO 3166-1 market used to scope searches (e.g. "US")
    #[serde(default)]
    pub market: Option<String>,
}

/// Chart traversal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of weekly snapshots to walk back
    #[serde(default = "default_weeks")]
    pub weeks: u32,

    /// Concurrent enrichments per snapshot (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Artists known to be absent from the lookup service
    #[serde(default)]
    pub skip_artists: Vec<String>,

    /// Search for an identifier when a chart entry carries none
    #[serde(default = "default_resolve_missing_ids")]
    pub resolve_missing_ids: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            weeks: default_weeks(),
            workers: default_workers(),
            skip_artists: Vec::new(),
            resolve_missing_ids: default_resolve_missing_ids(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weeks() -> u32 {
    52
}

fn default_workers() -> usize {
    1
}

fn default_resolve_missing_ids() -> bool {
    true
}

impl TomlConfig {
    /// Check values that serde cannot express as types
    pub fn validate(&self) -> Result<()> {
        if self.run.weeks == 0 {
            return Err(Error::Config("run.weeks must be at least 1".to_string()));
        }
        if self.run.workers == 0 {
            return Err(Error::Config("run.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Locate the config file
///
/// Returns `None` when no explicit path is given and the platform default
/// does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("chartmeta").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load TOML config, falling back to defaults when the file is missing
///
/// A file that exists but fails to parse is an error: silently ignoring a
/// typo in credentials is worse than refusing to start.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    config.validate()?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the data folder following the standard priority order
pub fn resolve_data_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.data_folder {
        return path.clone();
    }

    default_data_folder()
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("chartmeta"))
        .unwrap_or_else(|| PathBuf::from("./chartmeta_data"))
}

/// Create the data folder if missing
pub fn ensure_data_folder(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created data folder {}", path.display());
    }
    Ok(())
}

/// Where a resolved secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    CommandLine,
    Environment,
    Toml,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::CommandLine => write!(f, "command line"),
            SecretSource::Environment => write!(f, "environment"),
            SecretSource::Toml => write!(f, "TOML"),
        }
    }
}

/// Resolve a secret from CLI → ENV → TOML
///
/// Warns when more than one source carries a usable value, since that
/// usually means a stale value is lying around somewhere.
pub fn resolve_secret(
    name: &str,
    cli_value: Option<&str>,
    env_var: &str,
    toml_value: Option<&str>,
) -> Option<(String, SecretSource)> {
    let env_value = std::env::var(env_var).ok();

    let candidates = [
        (cli_value.map(str::to_string), SecretSource::CommandLine),
        (env_value, SecretSource::Environment),
        (toml_value.map(str::to_string), SecretSource::Toml),
    ];

    let usable: Vec<(String, SecretSource)> = candidates
        .into_iter()
        .filter_map(|(value, source)| value.filter(|v| is_valid_key(v)).map(|v| (v, source)))
        .collect();

    if usable.len() > 1 {
        let sources: Vec<String> = usable.iter().map(|(_, s)| s.to_string()).collect();
        warn!(
            "{} found in multiple sources: {}. Using {} (highest priority).",
            name,
            sources.join(", "),
            usable[0].1
        );
    }

    let (value, source) = usable.into_iter().next()?;
    info!("{} loaded from {}", name, source);
    Some((value, source))
}

/// Validate a key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
