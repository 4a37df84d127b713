//! Search-path resolution for the server configuration file.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::PathBuf;

/// The canonical system-wide config file path.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/drbdmanaged.cfg";

/// Resolves where to look for the daemon's config file when none is given
/// explicitly on the command line.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Creates a new `Paths` with XDG discovery for the fallback location.
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("", "", "drbdmanage"),
        }
    }

    /// User-level config directory, used only when `/etc` is not writable
    /// (development and test setups).
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("failed to determine user config directory".to_string())
            })
    }

    /// Ordered list of candidate config file paths, most authoritative
    /// first: the system path, then a user-level fallback.
    pub fn search_path(&self) -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(SYSTEM_CONFIG_FILE)];
        if let Ok(user_dir) = self.user_config_dir() {
            candidates.push(user_dir.join("drbdmanaged.cfg"));
        }
        candidates
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_starts_with_system_config() {
        let paths = Paths::new();
        assert_eq!(paths.search_path()[0], PathBuf::from(SYSTEM_CONFIG_FILE));
    }
}
