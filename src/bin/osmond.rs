//! osmond - Process supervisor daemon
//!
//! Launches and watches the tasks listed in the configuration file and
//! serves the control channel used by `oscom`.
//!
//! # Usage
//!
//! ```bash
//! # Fork into the background
//! osmond -c /etc/osmon.yaml
//!
//! # Stay in the foreground with debug logging
//! osmond -c osmon.yaml -f -v
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use osmon_core::{ConfigLoader, Configuration, FileConfigLoader};
use osmond::logging::init_logging;
use osmond::signal::spawn_os_signal_listener;
use osmond::supervisor::Supervisor;

/// osmon daemon - process supervisor
#[derive(Parser, Debug)]
#[command(name = "osmond", version, about)]
struct Args {
    /// Configuration file (.json, .toml, .yaml/.yml/.conf)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Stay in the foreground instead of forking
    #[arg(short = 'f', long)]
    foreground: bool,

    /// PID file of the daemon
    #[arg(short = 'p', long = "pid")]
    pidfile: Option<PathBuf>,

    /// User to run as once daemonized
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Group to run as once daemonized
    #[arg(short = 'g', long)]
    group: Option<String>,

    /// Working directory once daemonized
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Debug logging regardless of the configured trace level
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn pid_file_path(&self, config: &Configuration) -> PathBuf {
        self.pidfile
            .clone()
            .or_else(|| config.pidfile.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("osmond.pid"))
    }
}

fn write_pid(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create PID file directory")?;
    }
    let mut file = File::create(path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Parse before forking so configuration errors reach the terminal
    let loader = Arc::new(FileConfigLoader::new(&args.config));
    let config = loader
        .load()
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let pid_path = args.pid_file_path(&config);

    if args.foreground {
        write_pid(&pid_path)?;
    } else {
        daemonize(&args, &config, &pid_path)?;
    }

    let result = run_daemon(loader, config, args.verbose);

    remove_pid_file(&pid_path);

    result
}

fn daemonize(args: &Args, config: &Configuration, pid_path: &Path) -> Result<()> {
    use daemonize::Daemonize;

    let cwd = args
        .cwd
        .clone()
        .or_else(|| config.cwd.clone())
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut daemonize = Daemonize::new().pid_file(pid_path).working_directory(cwd);

    if let Some(user) = args.user.as_deref().or(config.user.as_deref()) {
        daemonize = match user.parse::<u32>() {
            Ok(uid) => daemonize.user(uid),
            Err(_) => daemonize.user(user),
        };
    }
    if let Some(group) = args.group.as_deref().or(config.group.as_deref()) {
        daemonize = match group.parse::<u32>() {
            Ok(gid) => daemonize.group(gid),
            Err(_) => daemonize.group(group),
        };
    }

    daemonize.start().context("Failed to daemonize")?;
    Ok(())
}

#[tokio::main]
async fn run_daemon(
    loader: Arc<FileConfigLoader>,
    config: Configuration,
    verbose: bool,
) -> Result<()> {
    let log_handle = init_logging(&config, verbose).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "osmon daemon starting"
    );

    let supervisor = Supervisor::new(loader).with_log_handle(log_handle);
    let _signal_listener = spawn_os_signal_listener(supervisor.signals())
        .context("Failed to install signal handlers")?;

    if let Err(e) = supervisor.run_with(config).await {
        error!(error = %e, "Supervisor error");
        return Err(e.into());
    }

    info!("osmon daemon stopped");
    Ok(())
}
