//! Configuration loading
//!
//! Reads [`stratasync_domain::SyncConfig`] from TOML or JSON files and
//! applies `STRATASYNC_*` environment overrides.

pub mod loader;

pub use loader::{apply_env_overrides, load, load_from_file, probe_config_paths};
