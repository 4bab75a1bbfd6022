use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

/// Name of the configuration file looked up in user and project locations
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Returns the user-level configuration directory for kiln
/// (`~/.config/kiln` on Linux, `%APPDATA%\kiln` on Windows)
pub fn user_config_dir() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("kiln"))
}

/// Path of the user-level configuration file, whether or not it exists
pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}
