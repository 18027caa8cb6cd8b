//! XDG directory helpers for config/data locations.

use std::path::{Path, PathBuf};

/// Base directory for persistent data (log files, templates).
///
/// Uses `TFSYNC_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/tfsync` or
/// `~/.local/share/tfsync`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TFSYNC_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("tfsync")
}

/// Base directory for configuration files.
///
/// Uses `TFSYNC_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/tfsync` or
/// `~/.config/tfsync`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TFSYNC_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("tfsync")
}

/// Default directory for rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Seed `.gitignore` template copied into new workspaces when present.
pub fn gitignore_template_path() -> PathBuf {
    config_dir().join("gitignore")
}

/// Lock file for a named workspace.
pub fn lock_path(workspace_root: &Path, name: &str) -> PathBuf {
    workspace_root.join(format!("{name}.lock"))
}
