//! Wraps invocation of the external `drbdadm`/`drbdsetup` tools.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::DrbdAdmError;

/// Invokes `drbdadm`/`drbdsetup` with the configured tool path and `PATH`
/// search list for locating the helper scripts they in turn shell out to.
pub struct DrbdAdm {
    drbdadm_path: PathBuf,
    extend_path: String,
}

impl DrbdAdm {
    pub fn new(drbdadm_path: impl Into<PathBuf>, extend_path: impl Into<String>) -> Self {
        Self {
            drbdadm_path: drbdadm_path.into(),
            extend_path: extend_path.into(),
        }
    }

    fn run(&self, binary: &str, args: &[&str]) -> Result<(), DrbdAdmError> {
        let program = self.drbdadm_path.join(binary);
        tracing::debug!(?program, ?args, "invoking DRBD admin tool");

        let output = Command::new(&program)
            .args(args)
            .env("PATH", &self.extend_path)
            .output()
            .map_err(|source| DrbdAdmError::SpawnFailed {
                tool: binary.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DrbdAdmError::CommandFailed {
                tool: binary.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// `drbdadm adjust <resource>` — applies the current `.res` file.
    /// `force` passes `--force`, used when the assignment's `tstate` has
    /// `OVERWRITE` set (this node's data is authoritative).
    pub fn adjust(&self, resource_name: &str, force: bool) -> Result<(), DrbdAdmError> {
        if force {
            self.run("drbdadm", &["--force", "adjust", resource_name])
        } else {
            self.run("drbdadm", &["adjust", resource_name])
        }
    }

    /// `drbdadm up <resource>` — brings a resource up for the first time.
    pub fn up(&self, resource_name: &str) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["up", resource_name])
    }

    /// `drbdadm down <resource>`.
    pub fn down(&self, resource_name: &str) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["down", resource_name])
    }

    /// `drbdadm connect <resource>`. `discard` passes `--discard-my-data`,
    /// used when the assignment's `tstate` has `DISCARD` set (this node's
    /// data should lose any resync conflict).
    pub fn connect(&self, resource_name: &str, discard: bool) -> Result<(), DrbdAdmError> {
        if discard {
            self.run("drbdadm", &["connect", "--discard-my-data", resource_name])
        } else {
            self.run("drbdadm", &["connect", resource_name])
        }
    }

    /// `drbdadm primary <resource>`, optionally `--force` for an initial
    /// promotion with no existing UpToDate peer.
    pub fn primary(&self, resource_name: &str, force: bool) -> Result<(), DrbdAdmError> {
        if force {
            self.run("drbdadm", &["primary", "--force", resource_name])
        } else {
            self.run("drbdadm", &["primary", resource_name])
        }
    }

    /// `drbdadm secondary <resource>`.
    pub fn secondary(&self, resource_name: &str) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["secondary", resource_name])
    }

    /// `drbdadm new-current-uuid <resource>` — clears the bitmap and starts
    /// a new data generation without a full resync, used when deploying a
    /// lone node that is known to hold the only up-to-date copy.
    pub fn new_current_uuid(&self, resource_name: &str) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["new-current-uuid", resource_name])
    }

    /// `drbdadm disconnect <resource>`.
    pub fn disconnect(&self, resource_name: &str) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["disconnect", resource_name])
    }

    /// `drbdadm attach <resource>/<vol_nr>`.
    pub fn attach(&self, resource_name: &str, vol_nr: u16) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["attach", &format!("{resource_name}/{vol_nr}")])
    }

    /// `drbdadm detach <resource>/<vol_nr>`.
    pub fn detach(&self, resource_name: &str, vol_nr: u16) -> Result<(), DrbdAdmError> {
        self.run("drbdadm", &["detach", &format!("{resource_name}/{vol_nr}")])
    }

    /// `drbdsetup resize <resource>/<vol_nr>` — applies an online extend.
    pub fn resize(&self, resource_name: &str, vol_nr: u16) -> Result<(), DrbdAdmError> {
        self.run(
            "drbdsetup",
            &["resize", &format!("{resource_name}/{vol_nr}")],
        )
    }

    pub fn extend_path(&self) -> &str {
        &self.extend_path
    }

    pub fn drbdadm_path(&self) -> &Path {
        &self.drbdadm_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_reports_spawn_failure() {
        let admin = DrbdAdm::new("/nonexistent/path", "/usr/bin");
        let err = admin.adjust("res0", false).unwrap_err();
        assert!(matches!(err, DrbdAdmError::SpawnFailed { .. }));
    }
}
