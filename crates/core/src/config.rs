//! Configuration loading utilities
//!
//! Settings are resolved from several layers, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Config file (searched in standard locations)
//! 4. Built-in defaults

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Describes where a configuration was loaded from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Explicit path provided via CLI or env var
    Explicit(PathBuf),
    /// Found in current working directory
    CurrentDir(PathBuf),
    /// Found in XDG config home (~/.config/sealevel/)
    XdgConfig(PathBuf),
    /// Found in system config (/etc/sealevel/)
    System(PathBuf),
    /// No config file found, using defaults
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p.as_path()),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// Find a configuration file in standard locations
///
/// Search order:
/// 1. Environment variable (e.g. SEALEVEL_CONFIG)
/// 2. Current directory
/// 3. XDG config home ($XDG_CONFIG_HOME/sealevel/ or ~/.config/sealevel/)
/// 4. System config (/etc/sealevel/)
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    if let Ok(path) = env::var(env_var) {
        let p = PathBuf::from(&path);
        if p.exists() {
            return ConfigSource::Explicit(p);
        }
        log::warn!("{} points to missing file {}, ignoring", env_var, path);
    }

    let local = PathBuf::from(filename);
    if local.exists() {
        return ConfigSource::CurrentDir(local);
    }

    let xdg_path = xdg_home("XDG_CONFIG_HOME", ".config").join(filename);
    if xdg_path.exists() {
        return ConfigSource::XdgConfig(xdg_path);
    }

    let system = PathBuf::from("/etc").join(APP_NAME).join(filename);
    if system.exists() {
        return ConfigSource::System(system);
    }

    ConfigSource::Defaults
}

/// `$xdg_var/sealevel`, falling back to `$HOME/<home_suffix>/sealevel`
fn xdg_home(xdg_var: &str, home_suffix: &str) -> PathBuf {
    if let Ok(dir) = env::var(xdg_var) {
        PathBuf::from(dir).join(APP_NAME)
    } else if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(home_suffix).join(APP_NAME)
    } else {
        PathBuf::from(home_suffix).join(APP_NAME)
    }
}

/// Get the XDG cache directory for the application
///
/// Provider index files and reanalysis archives are cached here.
pub fn get_xdg_cache_dir() -> PathBuf {
    xdg_home("XDG_CACHE_HOME", ".cache")
}

/// Load and parse a TOML configuration file
///
/// Returns `T::default()` when `source` is [`ConfigSource::Defaults`].
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    match source.path() {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: T = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            Ok(config)
        }
        None => Ok(T::default()),
    }
}
