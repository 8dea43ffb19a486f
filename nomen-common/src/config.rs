//! Configuration file loading and data folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Application directory name used under the platform config/data dirs
pub const APP_DIR: &str = "nomen";

/// Data folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `data_folder` value of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = file_value {
        return path.to_path_buf();
    }

    default_data_folder()
}

/// Find the platform config file, if one exists
///
/// Linux checks `~/.config/nomen/config.toml` then `/etc/nomen/config.toml`.
pub fn locate_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and deserialize a TOML file
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Get OS-dependent default data folder path
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./nomen_data"))
}
