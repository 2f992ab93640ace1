//! Application configuration for Turn/IP.
//!
//! User config lives at `~/.turnip/turnip.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnipError};
use crate::types::{GenerationMode, RecordOrder};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "turnip.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".turnip";

// ---------------------------------------------------------------------------
// Config structs (matching turnip.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Output layout.
    #[serde(default)]
    pub output: OutputConfig,

    /// Generation behavior.
    #[serde(default)]
    pub generate: GenerateSection,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Order in which protocols are read.
    #[serde(default)]
    pub order: RecordOrder,

    /// Deadline for store queries and the publish stage.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            order: RecordOrder::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_store_path() -> String {
    "turnip.db".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory of the published tree.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// File name of the aggregate index document.
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Directory (relative to `dir`) holding per-protocol documents.
    #[serde(default = "default_protocols_dir")]
    pub protocols_dir: String,

    /// Whether to emit one document per protocol.
    #[serde(default)]
    pub per_protocol: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            index_file: default_index_file(),
            protocols_dir: default_protocols_dir(),
            per_protocol: false,
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}
fn default_index_file() -> String {
    "README.md".into()
}
fn default_protocols_dir() -> String {
    "protocols".into()
}

/// `[generate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSection {
    /// Strict or lenient handling of bad records.
    #[serde(default)]
    pub mode: GenerationMode,

    /// Top-level heading of the index document.
    #[serde(default = "default_title")]
    pub title: String,

    /// Whether to append the resources collection to the index.
    #[serde(default = "default_true")]
    pub resources: bool,
}

impl Default for GenerateSection {
    fn default() -> Self {
        Self {
            mode: GenerationMode::default(),
            title: default_title(),
            resources: true,
        }
    }
}

fn default_title() -> String {
    "Turn/IP".into()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Generate config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime generation settings, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub store_path: PathBuf,
    pub order: RecordOrder,
    pub timeout_secs: u64,
    pub output_dir: PathBuf,
    pub index_file: String,
    pub protocols_dir: String,
    pub per_protocol: bool,
    pub mode: GenerationMode,
    pub title: String,
    pub include_resources: bool,
}

impl From<&AppConfig> for GenerateConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            store_path: PathBuf::from(&config.store.path),
            order: config.store.order,
            timeout_secs: config.store.timeout_secs,
            output_dir: PathBuf::from(&config.output.dir),
            index_file: config.output.index_file.clone(),
            protocols_dir: config.output.protocols_dir.clone(),
            per_protocol: config.output.per_protocol,
            mode: config.generate.mode,
            title: config.generate.title.clone(),
            include_resources: config.generate.resources,
        }
    }
}

impl GenerateConfig {
    /// Reject settings that would publish outside the output tree or never
    /// time out.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(TurnipError::config("timeout_secs must be at least 1"));
        }
        check_relative("index_file", &self.index_file)?;
        check_relative("protocols_dir", &self.protocols_dir)?;
        Ok(())
    }
}

fn check_relative(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TurnipError::config(format!("{field} cannot be empty")));
    }
    let path = Path::new(value);
    if path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
        return Err(TurnipError::config(format!(
            "{field} must be a path inside the output directory, got '{value}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.turnip/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TurnipError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.turnip/turnip.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TurnipError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TurnipError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TurnipError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TurnipError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TurnipError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
