//! Server configuration for the drbdmanage daemon.
//!
//! Loads the daemon's configuration from a `key=value` text file (one
//! setting per line, `#` starts a comment, blank lines are ignored) and
//! layers it over built-in defaults and `DRBDMANAGE_*` environment
//! overrides:
//!
//! 1. Environment variables (`DRBDMANAGE_<KEY>`, highest precedence)
//! 2. The configuration file, if present
//! 3. Built-in defaults (lowest precedence)
//!
//! Unrecognized keys in the file are preserved in [`DrbdmanageConfig::extra`]
//! rather than rejected, so a storage or deployer plugin can read its own
//! settings out of the same file.

use std::collections::BTreeMap;
use std::path::PathBuf;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Server configuration for the drbdmanage daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrbdmanageConfig {
    /// Name of the storage backend plugin to use.
    pub storage_plugin: String,
    /// Name of the deployer plugin to use.
    pub deployer_plugin: String,
    /// Highest node id usable within a resource (DRBD9 protocol limit).
    pub max_node_id: u32,
    /// Maximum number of peers a single assignment may replicate to.
    pub max_peers: u32,
    /// Lowest DRBD minor number the allocator will hand out.
    pub min_minor_nr: u32,
    /// Lowest TCP port the allocator will hand out.
    pub min_port_nr: u16,
    /// Highest TCP port the allocator will hand out.
    pub max_port_nr: u16,
    /// Path to the `drbdadm` binary.
    pub drbdadm_path: PathBuf,
    /// `PATH`-style search list used when locating helper tools.
    pub extend_path: String,
    /// Directory where generated `.res` files are written.
    pub drbd_conf_path: PathBuf,
    /// Name of the LVM volume group backing the control volume.
    pub drbdctrl_vg: String,
    /// Any other `key=value` pairs found in the config file, verbatim.
    pub extra: BTreeMap<String, String>,
}

impl Default for DrbdmanageConfig {
    fn default() -> Self {
        Self {
            storage_plugin: "drbdmanage.storage.lvm.Lvm".to_string(),
            deployer_plugin: "drbdmanage.deployers.BalancedDeployer".to_string(),
            max_node_id: 31,
            max_peers: 7,
            min_minor_nr: 100,
            min_port_nr: 7000,
            max_port_nr: 7999,
            drbdadm_path: PathBuf::from("/usr/sbin"),
            extend_path: "/sbin:/usr/sbin:/bin:/usr/bin".to_string(),
            drbd_conf_path: PathBuf::from("/var/lib/drbd.d"),
            drbdctrl_vg: "drbdpool".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl DrbdmanageConfig {
    /// Keys recognized by this struct, in the order they are documented.
    pub(crate) const KNOWN_KEYS: &'static [&'static str] = &[
        "storage-plugin",
        "deployer-plugin",
        "max-node-id",
        "max-peers",
        "min-minor-nr",
        "min-port-nr",
        "max-port-nr",
        "drbdadm-path",
        "extend-path",
        "drbd-conf-path",
        "drbdctrl-vg",
    ];

    /// Load configuration from the default search path.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Load configuration from a specific file, skipping the search path.
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_config_file(path).load()
    }

    /// Applies a single `key=value` pair on top of this configuration.
    ///
    /// Unknown keys are stored verbatim in [`extra`](Self::extra) rather
    /// than rejected.
    pub(crate) fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "storage-plugin" => self.storage_plugin = value.to_string(),
            "deployer-plugin" => self.deployer_plugin = value.to_string(),
            "max-node-id" => self.max_node_id = parse_u32(key, value)?,
            "max-peers" => self.max_peers = parse_u32(key, value)?,
            "min-minor-nr" => self.min_minor_nr = parse_u32(key, value)?,
            "min-port-nr" => self.min_port_nr = parse_u16(key, value)?,
            "max-port-nr" => self.max_port_nr = parse_u16(key, value)?,
            "drbdadm-path" => self.drbdadm_path = PathBuf::from(value),
            "extend-path" => self.extend_path = value.to_string(),
            "drbd-conf-path" => self.drbd_conf_path = PathBuf::from(value),
            "drbdctrl-vg" => self.drbdctrl_vg = value.to_string(),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parses `key=value` config-file text into an ordered list of pairs.
///
/// `#` starts a line comment; blank lines are skipped; `key` and `value`
/// are trimmed of surrounding whitespace. A line with no `=` is an error.
pub(crate) fn parse_kv(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or(ConfigError::MalformedLine {
            line: lineno + 1,
            text: raw_line.to_string(),
        })?;
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = DrbdmanageConfig::default();
        assert_eq!(config.max_node_id, 31);
        assert_eq!(config.max_peers, 7);
        assert_eq!(config.min_minor_nr, 100);
        assert_eq!(config.min_port_nr, 7000);
        assert_eq!(config.max_port_nr, 7999);
        assert_eq!(config.drbdctrl_vg, "drbdpool");
    }

    #[test]
    fn parse_kv_skips_comments_and_blanks() {
        let text = "# a comment\n\nmax-peers=3\nstorage-plugin = my.plugin # trailing comment\n";
        let pairs = parse_kv(text).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("max-peers".to_string(), "3".to_string()),
                ("storage-plugin".to_string(), "my.plugin".to_string()),
            ]
        );
    }

    #[test]
    fn parse_kv_rejects_lines_without_equals() {
        let err = parse_kv("not-a-pair\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn apply_overrides_known_key() {
        let mut config = DrbdmanageConfig::default();
        config.apply("max-peers", "4").unwrap();
        assert_eq!(config.max_peers, 4);
    }

    #[test]
    fn apply_preserves_unknown_key_in_extra() {
        let mut config = DrbdmanageConfig::default();
        config.apply("custom-plugin-setting", "42").unwrap();
        assert_eq!(
            config.extra.get("custom-plugin-setting"),
            Some(&"42".to_string())
        );
    }

    #[test]
    fn apply_rejects_non_numeric_value_for_numeric_key() {
        let mut config = DrbdmanageConfig::default();
        let err = config.apply("max-peers", "not-a-number").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
