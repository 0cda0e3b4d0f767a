//! The top-level supervision loop.
//!
//! ```text
//! ┌──────────────────────────── outer loop ────────────────────────────┐
//! │ build registry ─▶ bind + spawn ControlServer ─▶ start_all          │
//! │                                                                    │
//! │   ┌────────────── inner loop ──────────────┐                       │
//! │   │ wait(flags, monitor_interval)          │                       │
//! │   │   timeout      ─▶ monitor_all ─▶ loop  │                       │
//! │   │   STOP/RESTART/RELOAD ─▶ leave         │                       │
//! │   └────────────────────────────────────────┘                       │
//! │                                                                    │
//! │ drain restarts ─▶ stop_all (unless RELOAD) ─▶ stop server          │
//! │ STOP ─▶ exit          RESTART/RELOAD ─▶ reload config, clear, loop │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! RELOAD leaves running processes alone. Tasks dropped from the new
//! configuration keep running unmanaged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use osmon_core::{ConfigError, ConfigLoader, Configuration};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::logging::LogHandle;
use crate::monitor::{RestartScheduler, StartupTiming};
use crate::registry::ProcessRegistry;
use crate::server::{ControlServer, ServerError};
use crate::signal::{Signal, SignalFlags};

/// Errors that end the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control server error: {0}")]
    Server(#[from] ServerError),
}

/// Drives the registry and the control server until STOP.
pub struct Supervisor {
    loader: Arc<dyn ConfigLoader>,
    signals: SignalFlags,
    timing: StartupTiming,
    listening: watch::Sender<Option<SocketAddr>>,
    log_handle: Option<LogHandle>,
}

impl Supervisor {
    pub fn new(loader: Arc<dyn ConfigLoader>) -> Self {
        let (listening, _) = watch::channel(None);
        Self {
            loader,
            signals: SignalFlags::new(),
            timing: StartupTiming::default(),
            listening,
            log_handle: None,
        }
    }

    /// Overrides process startup timings.
    #[must_use]
    pub fn with_timing(mut self, timing: StartupTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Lets reloads update the log level.
    #[must_use]
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Flags shared with the control server and OS signal handlers.
    pub fn signals(&self) -> SignalFlags {
        self.signals.clone()
    }

    /// Address of the control server while one is running.
    pub fn listening(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.listening.subscribe()
    }

    /// Loads the configuration and runs until STOP.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        let config = self.loader.load()?;
        self.run_with(config).await
    }

    /// Runs with an already loaded configuration.
    pub async fn run_with(&self, mut config: Configuration) -> Result<(), SupervisorError> {
        info!(pid = std::process::id(), "Supervisor starting");

        loop {
            log_configuration(&config);

            let restarts = RestartScheduler::new();
            let registry = Arc::new(ProcessRegistry::from_config(&config, self.timing, &restarts));

            let server =
                ControlServer::bind(config.listen, Arc::clone(&registry), self.signals.clone())
                    .await?;
            let addr = server.local_addr()?;
            let server_token = CancellationToken::new();
            let server_task = tokio::spawn(server.run(server_token.clone()));
            self.listening.send_replace(Some(addr));

            registry.start_all().await;

            let raised = self.supervise(&registry, config.monitor_period()).await;
            info!(flags = ?raised, "Supervision cycle interrupted");

            // No delayed restart may spawn anything past this point
            restarts.shutdown().await;

            if raised.contains(Signal::STOP) || !raised.contains(Signal::RELOAD) {
                registry.stop_all().await;
            } else {
                info!("Reload requested, leaving running tasks alone");
            }

            server_token.cancel();
            match server_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Control server ended with error"),
                Err(e) => error!(error = %e, "Control server task failed"),
            }
            self.listening.send_replace(None);
            drop(registry);

            if raised.contains(Signal::STOP) {
                info!("Supervisor stopped");
                return Ok(());
            }

            config = self.reload(config);
            self.signals.clear(Signal::RESTART | Signal::RELOAD);
        }
    }

    /// Inner loop: monitors every interval until a flag is raised.
    async fn supervise(&self, registry: &ProcessRegistry, period: Duration) -> Signal {
        loop {
            let raised = self.signals.wait_timeout(period).await;
            if !raised.is_empty() {
                return self.signals.current();
            }
            registry.monitor_all().await;
        }
    }

    /// Loads a fresh configuration, keeping the previous one on failure.
    fn reload(&self, previous: Configuration) -> Configuration {
        match self.loader.load() {
            Ok(config) => {
                if let Some(ref handle) = self.log_handle {
                    if let Err(e) = handle.apply(&config) {
                        warn!(error = %e, "Failed to apply log level");
                    }
                }
                config
            }
            Err(e) => {
                error!(error = %e, "Failed to reload configuration, keeping previous");
                previous
            }
        }
    }
}

fn log_configuration(config: &Configuration) {
    info!(
        version = config.version,
        monitor_interval = config.monitor_interval,
        trace_level = %config.trace_level,
        listen = %config.listen,
        tasks = config.processes.len(),
        "Configuration"
    );
    for task in &config.processes {
        info!(
            task = %task.name,
            process = %task.process.display(),
            arguments = ?task.arguments,
            pidfile = %task.pidfile_display(),
            restart_delay = task.restart_delay,
            "Task"
        );
    }
    debug!(config = ?config, "Full configuration");
}
