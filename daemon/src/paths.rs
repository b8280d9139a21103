/// Canonical file paths for the watchpost daemon.
///
/// The config file is `$WATCHPOST_CONFIG` when set, otherwise
/// `/etc/watchpost/watchpost.toml`.
use std::path::PathBuf;

pub const CONFIG_ENV_VAR: &str = "WATCHPOST_CONFIG";
const SYSTEM_CONFIG_DIR: &str = "/etc/watchpost";
pub const CONFIG_FILE_NAME: &str = "watchpost.toml";

/// Name of the stable snapshot file/link inside a target directory.
pub const LAST_SNAPSHOT_STEM: &str = "lastsnap";

/// Returns the full path to the config file.
pub fn config_file_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}

fn resolve_config_path(from_env: Option<PathBuf>) -> PathBuf {
    match from_env {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME),
    }
}
