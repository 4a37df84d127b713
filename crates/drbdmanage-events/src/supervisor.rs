//! Supervises the `drbdsetup events2 all` subprocess.
//!
//! Registers the subprocess's stdout with the caller's [`mio::Poll`] so the
//! single-threaded event loop can drain it without blocking, parses
//! complete lines, and coalesces any number of trigger lines seen in one
//! drain into a single reconcile request (mirroring the original's
//! `drbd_event`: it drains everything available, tracks one `changed`
//! flag, and schedules at most one reconciliation run per drain).

use std::io::Read;
use std::os::fd::OwnedFd;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use bytes::BytesMut;
use mio::unix::pipe;
use mio::{Interest, Poll, Token};

use crate::line::{is_reconcile_trigger, EventLine};
use crate::EventsError;

/// Time to wait after each step of the graceful-termination sequence.
const TERM_SLEEP_SHORT: Duration = Duration::from_millis(500);
const TERM_SLEEP_LONG: Duration = Duration::from_secs(2);

/// Flat delay between restart attempts while the subprocess is down,
/// matching the original's plain `time.sleep(30)` retry loop.
const RESTART_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Supervises the `drbdsetup events2 all` child process.
pub struct EventsSupervisor {
    drbdsetup_path: std::path::PathBuf,
    control_resource_name: String,
    token: Token,
    child: Option<Child>,
    receiver: Option<pipe::Receiver>,
    read_buf: BytesMut,
    warned: bool,
}

impl EventsSupervisor {
    pub fn new(
        drbdsetup_path: impl Into<std::path::PathBuf>,
        control_resource_name: impl Into<String>,
        token: Token,
    ) -> Self {
        Self {
            drbdsetup_path: drbdsetup_path.into(),
            control_resource_name: control_resource_name.into(),
            token,
            child: None,
            receiver: None,
            read_buf: BytesMut::with_capacity(4096),
            warned: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawns `drbdsetup events2 all` and registers its stdout for
    /// readability with `poll`.
    pub fn start(&mut self, poll: &Poll) -> Result<(), EventsError> {
        let mut child = Command::new(self.drbdsetup_path.join("drbdsetup"))
            .args(["events2", "all"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or(EventsError::NoStdout)?;
        let owned = OwnedFd::from(stdout);
        let mut receiver = pipe::Receiver::from(owned);

        poll.registry()
            .register(&mut receiver, self.token, Interest::READABLE)
            .map_err(EventsError::Register)?;

        self.child = Some(child);
        self.receiver = Some(receiver);
        tracing::info!("events2 subprocess started");
        Ok(())
    }

    /// Drains all currently available lines, returning `true` if the drain
    /// should cause a reconcile to be scheduled. Call when `poll` reports
    /// readability or hang-up on [`token`](Self::token).
    pub fn drain(&mut self) -> bool {
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };

        let mut chunk = [0u8; 4096];
        let mut should_reconcile = false;
        loop {
            match receiver.read(&mut chunk) {
                Ok(0) => {
                    tracing::warn!("events2 subprocess closed its output pipe");
                    self.receiver = None;
                    break;
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                        let line_bytes = self.read_buf.split_to(pos + 1);
                        let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
                        if let Some(event) = EventLine::parse(&line) {
                            if is_reconcile_trigger(&event, &self.control_resource_name) {
                                should_reconcile = true;
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "error reading events2 pipe");
                    break;
                }
            }
        }
        should_reconcile
    }

    /// Six-stage graceful teardown: close the pipe, give the process a
    /// moment to exit on its own, escalate to SIGTERM, wait again, then
    /// SIGKILL as a last resort, finally reaping or abandoning the process.
    pub fn terminate(&mut self) {
        self.receiver = None; // stage 1: close the pipe
        std::thread::sleep(TERM_SLEEP_SHORT); // stage 2

        let Some(mut child) = self.child.take() else {
            return;
        };

        if Self::try_reap(&mut child) {
            return;
        }
        // SAFETY: `child.id()` names a process we spawned and still hold;
        // sending SIGTERM to it is the documented graceful-shutdown request.
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        std::thread::sleep(TERM_SLEEP_SHORT); // stage 3
        if Self::try_reap(&mut child) {
            return;
        }
        std::thread::sleep(TERM_SLEEP_LONG); // stage 4
        if Self::try_reap(&mut child) {
            return;
        }

        let _ = child.kill(); // stage 5: SIGKILL
        std::thread::sleep(TERM_SLEEP_SHORT); // stage 6
        if Self::try_reap(&mut child) {
            return;
        }
        std::thread::sleep(TERM_SLEEP_LONG);
        if !Self::try_reap(&mut child) {
            tracing::error!("events2 subprocess did not exit, abandoning it");
        }
    }

    fn try_reap(child: &mut Child) -> bool {
        matches!(child.try_wait(), Ok(Some(_)))
    }

    /// Delay before the next restart attempt.
    pub fn restart_delay(&self) -> Duration {
        RESTART_RETRY_DELAY
    }

    /// Returns `true` the first time it's called since the subprocess last
    /// started successfully, `false` on every call after that — so the
    /// caller logs one warning per outage instead of one per 30s retry.
    pub fn take_restart_warning(&mut self) -> bool {
        !std::mem::replace(&mut self.warned, true)
    }

    /// Called once a restart attempt succeeds, so the next failure warns
    /// again.
    pub fn mark_restarted(&mut self) {
        self.warned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_is_flat() {
        let supervisor = EventsSupervisor::new("/usr/sbin", ".drbdctrl", Token(0));
        assert_eq!(supervisor.restart_delay(), Duration::from_secs(30));
        assert_eq!(supervisor.restart_delay(), Duration::from_secs(30));
    }

    #[test]
    fn restart_warning_fires_once_per_outage() {
        let mut supervisor = EventsSupervisor::new("/usr/sbin", ".drbdctrl", Token(0));
        assert!(supervisor.take_restart_warning());
        assert!(!supervisor.take_restart_warning());
        assert!(!supervisor.take_restart_warning());

        supervisor.mark_restarted();
        assert!(supervisor.take_restart_warning());
    }

    #[test]
    fn drain_with_no_receiver_returns_false() {
        let mut supervisor =
            EventsSupervisor::new("/usr/sbin", ".drbdctrl", Token(0));
        assert!(!supervisor.drain());
    }
}
