//! oscom - Control client for the osmon daemon
//!
//! Sends one request to a running `osmond` and prints the outcome.
//!
//! # Usage
//!
//! ```bash
//! oscom status
//! oscom --host 10.0.0.5 --port 5678 reload
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, ValueEnum};

use oscom::{outcome_line, render_status, ClientConfig, ControlClient, DEFAULT_HOST};
use osmon_protocol::{Action, ControlRequest, DEFAULT_PORT};

/// osmon control client
#[derive(Parser, Debug)]
#[command(name = "oscom", version, about)]
struct Args {
    /// Daemon host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Daemon control port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the daemon
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[arg(value_enum)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Command {
    /// Show the daemon and its tasks
    Status,
    /// Stop all tasks and the daemon
    Stop,
    /// Same as stop
    Shutdown,
    /// Stop and start all tasks
    Restart,
    /// Re-read the configuration, keeping running tasks
    Reload,
}

impl Command {
    fn request(self) -> ControlRequest {
        match self {
            Command::Status => ControlRequest::new(Action::Status),
            Command::Stop => ControlRequest::new(Action::Stop),
            Command::Shutdown => ControlRequest::raw("shutdown"),
            Command::Restart => ControlRequest::new(Action::Restart),
            Command::Reload => ControlRequest::new(Action::Reload),
        }
    }

    fn action(self) -> Action {
        match self {
            Command::Status => Action::Status,
            Command::Stop | Command::Shutdown => Action::Stop,
            Command::Restart => Action::Restart,
            Command::Reload => Action::Reload,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let client = ControlClient::new(ClientConfig {
        host: args.host,
        port: args.port,
        timeout: Duration::from_secs(args.timeout),
    });

    let response = match client.send(&args.command.request()).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    match args.command.action() {
        Action::Status => print!("{}", render_status(&response, Local::now())),
        action => println!("{}", outcome_line(action, &response)),
    }

    if response.status {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
