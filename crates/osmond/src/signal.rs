//! Supervisor signal flags.
//!
//! The control server and OS signal handlers raise flags; the supervisor
//! loop waits on them between monitor cycles.
//!
//! ```text
//! ControlServer ──┐
//!                 ├──▶ SignalFlags (STOP | RESTART | RELOAD) ──▶ Supervisor
//! SIGTERM/SIGHUP ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

bitflags! {
    /// Requests pending for the supervisor loop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Signal: u8 {
        /// Stop all tasks and exit
        const STOP = 0b001;
        /// Stop all tasks, reload configuration and start again
        const RESTART = 0b010;
        /// Reload configuration, leave running tasks alone
        const RELOAD = 0b100;
    }
}

/// Shared, waitable set of `Signal` bits.
///
/// Cloning is cheap; all clones observe the same flags.
#[derive(Clone)]
pub struct SignalFlags {
    tx: Arc<watch::Sender<Signal>>,
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SignalFlags").field(&self.current()).finish()
    }
}

impl SignalFlags {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Signal::empty());
        Self { tx: Arc::new(tx) }
    }

    /// Raises flags and wakes every waiter.
    pub fn set(&self, flags: Signal) {
        self.tx.send_modify(|current| current.insert(flags));
    }

    /// Clears flags.
    pub fn clear(&self, flags: Signal) {
        self.tx.send_modify(|current| current.remove(flags));
    }

    /// Returns the flags currently raised.
    pub fn current(&self) -> Signal {
        *self.tx.borrow()
    }

    /// Returns true if any of `flags` is raised.
    pub fn is_set(&self, flags: Signal) -> bool {
        self.current().intersects(flags)
    }

    /// Waits until any flag is raised or the timeout elapses.
    ///
    /// Returns immediately if a flag is already raised. The returned value
    /// is the flag set at wake-up (empty on timeout).
    pub async fn wait_timeout(&self, timeout: Duration) -> Signal {
        let mut rx = self.tx.subscribe();
        let current = *rx.borrow_and_update();
        if !current.is_empty() {
            return current;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {
                    let current = *rx.borrow_and_update();
                    if !current.is_empty() {
                        return current;
                    }
                }
                // Sender lives as long as self; timeout ends the wait
                Ok(Err(_)) | Err(_) => return *rx.borrow(),
            }
        }
    }
}

/// Routes OS signals to the supervisor flags.
///
/// SIGTERM and SIGINT raise STOP, SIGHUP raises RELOAD. The task ends
/// after the first STOP.
#[cfg(unix)]
pub fn spawn_os_signal_listener(flags: SignalFlags) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, stopping");
                    flags.set(Signal::STOP);
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, stopping");
                    flags.set(Signal::STOP);
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    flags.set(Signal::RELOAD);
                }
            }
        }
    }))
}

/// Routes Ctrl-C to the STOP flag.
#[cfg(not(unix))]
pub fn spawn_os_signal_listener(flags: SignalFlags) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, stopping");
                flags.set(Signal::STOP);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    }))
}
