//! Default paths for lockwarden components
//!
//! Paths are user-writable by default:
//! - Config: `$XDG_CONFIG_HOME/lockwarden/config.toml` or `~/.config/lockwarden/config.toml`
//! - Data: `$XDG_DATA_HOME/lockwarden` or `~/.local/share/lockwarden`
//!
//! Only the service binary calls these, once at startup.

use std::path::PathBuf;

/// Application subdirectory name
const APP_DIR: &str = "lockwarden";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Audit database filename within the data directory
const DB_FILENAME: &str = "lockwarden.db";

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    home_relative(&[".config", APP_DIR]).join(CONFIG_FILENAME)
}

/// Get the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_relative(&[".local", "share", APP_DIR])
}

/// Get the default audit database path within a data directory.
pub fn default_db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(DB_FILENAME)
}

fn home_relative(parts: &[&str]) -> PathBuf {
    let base = match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home),
        // Last resort: /tmp/lockwarden-$USER
        Err(_) => {
            let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
            return PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username));
        }
    };
    parts.iter().fold(base, |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_end_with_app_names() {
        assert!(default_config_path().ends_with("lockwarden/config.toml"));
        let data = default_data_dir();
        assert!(data.to_string_lossy().contains("lockwarden"));
        assert!(default_db_path(&data).ends_with("lockwarden.db"));
    }
}
