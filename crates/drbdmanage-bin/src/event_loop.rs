//! The cooperative single-threaded event loop.
//!
//! Registers two readiness sources with one [`mio::Poll`]: the
//! `drbdsetup events2 all` pipe and the process signal mask. Blocks in
//! `poll.poll` with a timeout that doubles as the self-scheduled reconcile
//! tick, draining whichever sources fired (or none, on a plain timeout)
//! before checking whether a reconcile pass is due.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use drbdmanage_events::EventsSupervisor;
use drbdmanage_reconcile::NullNotifier;
use drbdmanage_server::ServerFacade;
use mio::{Events, Poll, Token};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;

/// Readiness token for the `events2` subprocess pipe.
const EVENTS_TOKEN: Token = Token(0);
/// Readiness token for the process signal mask.
const SIGNAL_TOKEN: Token = Token(1);

/// Upper bound on how long one `poll.poll` call blocks; also the interval
/// at which a reconcile pass is attempted even with no external trigger.
const TICK_INTERVAL: Duration = Duration::from_secs(10);

const CONTROL_RESOURCE: &str = ".drbdctrl";

pub fn run(mut facade: ServerFacade<NullNotifier>, drbdadm_path: PathBuf) -> Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(128);

    let mut supervisor = EventsSupervisor::new(drbdadm_path, CONTROL_RESOURCE, EVENTS_TOKEN);
    supervisor.start(&poll)?;

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    poll.registry()
        .register(&mut signals, SIGNAL_TOKEN, mio::Interest::READABLE)?;

    tracing::info!("drbdmanaged event loop starting");

    'outer: loop {
        if let Err(err) = poll.poll(&mut events, Some(TICK_INTERVAL)) {
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }

        if events.is_empty() {
            facade.reconciler_mut().request_run();
        }

        for event in &events {
            match event.token() {
                EVENTS_TOKEN => {
                    if supervisor.drain() {
                        facade.reconciler_mut().request_run();
                    }
                    if !supervisor.is_running() {
                        if supervisor.take_restart_warning() {
                            tracing::warn!("events2 subprocess exited, restarting");
                        }
                        std::thread::sleep(supervisor.restart_delay());
                        if supervisor.start(&poll).is_ok() {
                            supervisor.mark_restarted();
                        }
                    }
                }
                SIGNAL_TOKEN => {
                    for signal in signals.pending() {
                        tracing::info!(signal, "received shutdown signal");
                        break 'outer;
                    }
                }
                _ => {}
            }
        }

        if let Err(err) = facade.run_reconcile() {
            tracing::error!(%err, "reconcile pass failed");
        }
    }

    tracing::info!("drbdmanaged shutting down");
    supervisor.terminate();
    Ok(())
}
