//! Sealevel Core Library
//!
//! Shared utilities for the sealevel fetcher:
//! - Configuration loading (XDG-compliant)
//! - File system utilities

mod config;
pub mod fs;

pub use config::{find_config_file, get_xdg_cache_dir, load_config, ConfigSource};
pub use fs::{create_dir_all, list_files_with_extension, recreate_dir};

/// Application name used for XDG paths
pub const APP_NAME: &str = "sealevel";

/// Config file searched for in the standard locations
pub const CONFIG_FILE_NAME: &str = "sealevel.toml";

/// Environment variable holding an explicit config file path
pub const CONFIG_ENV_VAR: &str = "SEALEVEL_CONFIG";

/// Default directory for retrieved waterlevel files
pub const DEFAULT_OUTPUT_DIR: &str = "./waterlevel";
