//! Loads [`DrbdmanageConfig`] from the file search path and the
//! environment, layering overrides in order of increasing precedence.

use crate::{parse_kv, ConfigError, DrbdmanageConfig, Paths};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Environment variable prefix for config overrides, e.g.
/// `DRBDMANAGE_MAX_PEERS=4`.
const ENV_PREFIX: &str = "DRBDMANAGE_";

/// Builder for loading a [`DrbdmanageConfig`].
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader that will search the default locations.
    pub fn new() -> Self {
        Self { config_file: None }
    }

    /// Forces loading from a specific file instead of searching.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Loads the configuration, applying (in increasing precedence):
    /// built-in defaults, the config file if found, then environment
    /// variables.
    pub fn load(self) -> Result<DrbdmanageConfig, ConfigError> {
        let mut config = DrbdmanageConfig::default();

        let candidate = self
            .config_file
            .clone()
            .or_else(|| Paths::new().search_path().into_iter().find(|p| p.exists()));

        if let Some(path) = candidate {
            if path.exists() {
                let text = fs::read_to_string(&path).map_err(|source| ConfigError::ReadError {
                    path: path.clone(),
                    source,
                })?;
                for (key, value) in parse_kv(&text)? {
                    config.apply(&key, &value)?;
                }
                tracing::info!(path = %path.display(), "loaded server configuration");
            }
        } else {
            tracing::debug!("no server configuration file found, using built-in defaults");
        }

        self.apply_env_overrides(&mut config)?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut DrbdmanageConfig) -> Result<(), ConfigError> {
        for key in DrbdmanageConfig::KNOWN_KEYS {
            let var_name = format!("{ENV_PREFIX}{}", key.to_uppercase().replace('-', "_"));
            if let Ok(value) = env::var(&var_name) {
                config.apply(key, &value)?;
            }
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_when_no_file_present() {
        let dir = tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_config_file(dir.path().join("missing.cfg"))
            .load()
            .unwrap();
        assert_eq!(config.max_peers, 7);
    }

    #[test]
    fn load_applies_file_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drbdmanaged.cfg");
        fs::write(&path, "max-peers = 3\nstorage-plugin=my.plugin\n").unwrap();

        let config = ConfigLoader::new().with_config_file(&path).load().unwrap();
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.storage_plugin, "my.plugin");
        // untouched keys keep their default
        assert_eq!(config.max_node_id, 31);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drbdmanaged.cfg");
        fs::write(&path, "max-peers=3\n").unwrap();

        // SAFETY-equivalent: single-threaded test process, no concurrent env readers.
        env::set_var("DRBDMANAGE_MAX_PEERS", "5");
        let result = ConfigLoader::new().with_config_file(&path).load();
        env::remove_var("DRBDMANAGE_MAX_PEERS");

        assert_eq!(result.unwrap().max_peers, 5);
    }
}
