//! Configuration loader
//!
//! Loads [`SyncConfig`] from a file and applies environment overrides.
//!
//! ## Loading Strategy
//! 1. Loads a `.env` file from the working directory when present
//! 2. Reads the file named by `STRATASYNC_CONFIG`, or probes standard paths
//! 3. Falls back to built-in defaults when no file is found
//! 4. Applies `STRATASYNC_*` overrides, then validates
//!
//! ## Environment Variables
//! - `STRATASYNC_CONFIG`: Path to a TOML or JSON config file
//! - `STRATASYNC_LOG_LEVEL`: Log filter directive (e.g. `info`, `stratasync=debug`)
//! - `STRATASYNC_LOG_JSON`: Emit JSON log lines (true/false)
//! - `STRATASYNC_RECOVERY_TICK_MS`: Recovery tick interval
//! - `STRATASYNC_RECOVERY_BASE_DELAY_MS`: First recovery delay
//! - `STRATASYNC_RECOVERY_MAX_DELAY_MS`: Recovery delay ceiling
//! - `STRATASYNC_RECOVERY_MAX_ATTEMPTS`: Recovery attempts before escalation
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./stratasync.toml` or `./stratasync.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names one and two directories up
//! 4. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use stratasync_domain::{Result, StratasyncError, SyncConfig};

const CONFIG_PATH_VAR: &str = "STRATASYNC_CONFIG";
const CONFIG_FILE_NAMES: [&str; 4] =
    ["stratasync.toml", "stratasync.json", "config.toml", "config.json"];

/// Load configuration from file and environment
///
/// # Errors
/// Returns `StratasyncError::Config` if:
/// - `STRATASYNC_CONFIG` names a missing file
/// - The file cannot be parsed
/// - An override has an invalid value
/// - The resulting configuration fails validation
pub fn load() -> Result<SyncConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "Could not load .env file"),
    }

    let explicit = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => read_config(&path)?,
        None => {
            tracing::warn!("No config file found, using built-in defaults");
            SyncConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!(targets = config.targets.len(), "Configuration loaded");
    Ok(config)
}

/// Load and validate configuration from a file
///
/// If `path` is `None`, probes the standard locations. Environment
/// overrides are not applied.
///
/// # Errors
/// Returns `StratasyncError::Config` if the file is missing, cannot be
/// parsed, or fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<SyncConfig> {
    let config_path = match path {
        Some(p) => p,
        None => probe_config_paths().ok_or_else(|| {
            StratasyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Err(StratasyncError::Config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)
        .map_err(|e| StratasyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration, detecting the format from the file extension
fn parse_config(contents: &str, path: &Path) -> Result<SyncConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| StratasyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| StratasyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(StratasyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Apply `STRATASYNC_*` overrides on top of a loaded configuration
///
/// Unset variables leave the configuration untouched.
///
/// # Errors
/// Returns `StratasyncError::Config` when a variable holds an unparseable
/// value.
pub fn apply_env_overrides(config: &mut SyncConfig) -> Result<()> {
    if let Ok(level) = std::env::var("STRATASYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("STRATASYNC_LOG_JSON", config.logging.json);

    let recovery = &mut config.recovery;
    if let Some(value) = env_parse("STRATASYNC_RECOVERY_TICK_MS")? {
        recovery.tick_interval_ms = value;
    }
    if let Some(value) = env_parse("STRATASYNC_RECOVERY_BASE_DELAY_MS")? {
        recovery.base_delay_ms = value;
    }
    if let Some(value) = env_parse("STRATASYNC_RECOVERY_MAX_DELAY_MS")? {
        recovery.max_delay_ms = value;
    }
    if let Some(value) = env_parse("STRATASYNC_RECOVERY_MAX_ATTEMPTS")? {
        recovery.max_attempts = value;
    }
    Ok(())
}

/// Probe standard paths for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend([exe_dir.to_path_buf(), exe_dir.join(".."), exe_dir.join("../..")]);
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Parse an optional numeric environment variable
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StratasyncError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
