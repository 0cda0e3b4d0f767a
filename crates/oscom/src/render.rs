//! Plain-text rendering of control responses.
//!
//! ```text
//! OSMON daemon
//!   Start date & time: 2024-12-14 08:43:04 - 1 day, 22:55:53
//!   Status:            sleeping
//!   ...
//! +----------------------+----------------------------+--------------+...
//! | Task                 | Start date & time          | Status       |...
//! ```
//!
//! Rendering takes `now` explicitly so output is reproducible in tests.

use std::fmt::Write as _;

use chrono::{DateTime, Local, TimeZone};
use osmon_core::ProcessSnapshot;
use osmon_protocol::{Action, ControlResponse, TaskProcessInfo};

const SEPARATOR: &str = "+----------------------+----------------------------+--------------+--------------+---------+--------------------+";
const HEADER: &str = "| Task                 | Start date & time          | Status       | Cpu / usage  | Memory  | Working directory";

/// Renders a full `status` response: daemon block followed by the task table.
///
/// A failure response renders as its message.
pub fn render_status(response: &ControlResponse, now: DateTime<Local>) -> String {
    if !response.status {
        return format!("{}\n", response.message);
    }

    let mut out = String::new();
    if let Some(osmon) = &response.osmon {
        render_daemon(&mut out, osmon, now);
    }

    let _ = writeln!(out, "{}", SEPARATOR);
    let _ = writeln!(out, "{}", HEADER);
    let _ = writeln!(out, "{}", SEPARATOR);
    for task in &response.parameters {
        render_task(&mut out, task, now);
        let _ = writeln!(out, "{}", SEPARATOR);
    }
    out
}

/// One-line outcome for the lifecycle actions.
pub fn outcome_line(action: Action, response: &ControlResponse) -> String {
    if !response.status {
        return response.message.clone();
    }
    match action {
        Action::Stop => "Shutdown in progress".to_string(),
        Action::Restart => "Restart in progress".to_string(),
        Action::Reload => "Reload in progress".to_string(),
        Action::Status => response.message.clone(),
    }
}

fn render_daemon(out: &mut String, osmon: &ProcessSnapshot, now: DateTime<Local>) {
    let start = start_time(osmon);
    let _ = writeln!(out, "OSMON daemon");
    let _ = writeln!(
        out,
        "  Start date & time: {} - {}",
        format_start(start),
        format_elapsed(start, now)
    );
    let _ = writeln!(out, "  Status:            {}", osmon.status);
    let _ = writeln!(
        out,
        "  Cpu / usage:       {} / {:.2}%",
        format_cpu_num(osmon.cpu_num),
        osmon.cpu_percent
    );
    let _ = writeln!(out, "  Memory usage:      {:.2}%", osmon.memory_percent);
    let _ = writeln!(out, "  Working directory: {}", format_cwd(osmon));
}

fn render_task(out: &mut String, task: &TaskProcessInfo, now: DateTime<Local>) {
    let Some(process) = task.process.as_ref().filter(|_| task.is_running()) else {
        let _ = writeln!(
            out,
            "| {:20} | {:26} | {:12} | {:12} | {:7} |",
            task.name, "-", task.status, "-", "-"
        );
        return;
    };

    let start = start_time(process);
    let cpu = format!(
        "{} / {:7}",
        format_cpu_num(process.cpu_num),
        format!("{:.2}%", process.cpu_percent)
    );
    let _ = writeln!(
        out,
        "| {:20} | {:26} | {:12} | {:12} | {:7} | {}",
        task.name,
        format_start(start),
        process.status,
        cpu,
        format!("{:.2}%", process.memory_percent),
        format_cwd(process)
    );
    let _ = writeln!(
        out,
        "| {:20} | {:26} | {:12} | {:12} | {:7} |",
        "",
        format_elapsed(start, now),
        "",
        "",
        ""
    );
}

fn start_time(snapshot: &ProcessSnapshot) -> Option<DateTime<Local>> {
    i64::try_from(snapshot.create_time)
        .ok()
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
}

fn format_start(start: Option<DateTime<Local>>) -> String {
    start
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_elapsed(start: Option<DateTime<Local>>, now: DateTime<Local>) -> String {
    match start {
        Some(start) => format_duration((now - start).num_seconds()),
        None => "-".to_string(),
    }
}

fn format_cpu_num(cpu_num: Option<u32>) -> String {
    cpu_num
        .map(|n| format!("{:02}", n))
        .unwrap_or_else(|| "--".to_string())
}

fn format_cwd(snapshot: &ProcessSnapshot) -> String {
    snapshot
        .cwd
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let rest = seconds % 86_400;
    let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}
