//! Process sampling.
//!
//! Uses sysinfo for the portable fields and, on Linux, procfs for the
//! details sysinfo does not expose (CPU times split, statm pages, file
//! descriptors, context switches).

use std::collections::BTreeMap;
use std::ffi::OsString;

use osmon_core::{ContextSwitches, CpuTimes, MemoryInfo, ProcessSnapshot};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// Samples processes by PID.
///
/// Keeps one `System` alive between samples so CPU usage is computed over
/// the interval since the previous refresh of the same process.
pub struct ProcessSampler {
    system: System,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, pid: u32) {
        let pid = Pid::from_u32(pid);
        // Memory percentages need the totals
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
    }

    /// Returns true if a process with this PID exists.
    pub fn exists(&mut self, pid: u32) -> bool {
        self.refresh(pid);
        self.system.process(Pid::from_u32(pid)).is_some()
    }

    /// Returns the command line of a process, or `None` if it is gone.
    pub fn cmdline(&mut self, pid: u32) -> Option<Vec<String>> {
        self.refresh(pid);
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| lossy_all(process.cmd()))
    }

    /// Sends SIGKILL (or the platform equivalent) to a process.
    ///
    /// Returns false if the process is gone or the signal failed.
    pub fn kill(&mut self, pid: u32) -> bool {
        self.refresh(pid);
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.kill())
            .unwrap_or(false)
    }

    /// Takes a full sample of a process.
    ///
    /// Returns `None` if the process does not exist. Zombies are returned
    /// with status `zombie`; callers decide what that means.
    pub fn sample(&mut self, pid: u32) -> Option<ProcessSnapshot> {
        self.refresh(pid);

        let total_memory = self.system.total_memory();
        let process = self.system.process(Pid::from_u32(pid))?;

        let rss = process.memory();
        let memory_percent = if total_memory > 0 {
            (rss as f64 / total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };

        let environ = process
            .environ()
            .iter()
            .filter_map(|entry| {
                let entry = entry.to_string_lossy();
                entry
                    .split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        let mut snapshot = ProcessSnapshot {
            pid,
            ppid: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string_lossy().into_owned(),
            exe: process.exe().map(|p| p.to_path_buf()),
            cmdline: lossy_all(process.cmd()),
            cwd: process.cwd().map(|p| p.to_path_buf()),
            environ,
            username: None,
            status: status_name(process.status()).to_string(),
            cpu_num: None,
            cpu_percent: process.cpu_usage(),
            memory_percent,
            cpu_times: CpuTimes::default(),
            memory_info: MemoryInfo {
                rss,
                vms: process.virtual_memory(),
                ..MemoryInfo::default()
            },
            create_time: process.start_time(),
            num_threads: process.tasks().map(|t| t.len() as u32).unwrap_or(1),
            num_fds: None,
            num_ctx_switches: ContextSwitches::default(),
            terminal: None,
        };

        #[cfg(target_os = "linux")]
        enrich_from_procfs(&mut snapshot);

        Some(snapshot)
    }
}

fn lossy_all(values: &[OsString]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.to_string_lossy().into_owned())
        .collect()
}

/// Lower-case status names as shown by `oscom status`.
fn status_name(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Run => "running",
        ProcessStatus::Sleep => "sleeping",
        ProcessStatus::Idle => "idle",
        ProcessStatus::Stop => "stopped",
        ProcessStatus::Zombie => "zombie",
        ProcessStatus::Tracing => "tracing-stop",
        ProcessStatus::Dead => "dead",
        ProcessStatus::UninterruptibleDiskSleep => "disk-sleep",
        ProcessStatus::Waking => "waking",
        ProcessStatus::Wakekill => "wake-kill",
        ProcessStatus::Parked => "parked",
        ProcessStatus::LockBlocked => "locked",
        _ => "unknown",
    }
}

#[cfg(target_os = "linux")]
fn enrich_from_procfs(snapshot: &mut ProcessSnapshot) {
    let Ok(process) = procfs::process::Process::new(snapshot.pid as i32) else {
        return;
    };

    let ticks = procfs::ticks_per_second().max(1) as f64;
    if let Ok(stat) = process.stat() {
        snapshot.cpu_num = stat.processor.and_then(|cpu| u32::try_from(cpu).ok());
        snapshot.num_threads = u32::try_from(stat.num_threads).unwrap_or(snapshot.num_threads);
        snapshot.cpu_times = CpuTimes {
            user: stat.utime as f64 / ticks,
            system: stat.stime as f64 / ticks,
            children_user: stat.cutime as f64 / ticks,
            children_system: stat.cstime as f64 / ticks,
            iowait: stat.delayacct_blkio_ticks.unwrap_or(0) as f64 / ticks,
        };
        if stat.tty_nr != 0 {
            let major = (stat.tty_nr >> 8) & 0xfff;
            let minor = (stat.tty_nr & 0xff) | ((stat.tty_nr >> 12) & 0xfff00);
            snapshot.terminal = Some(terminal_name(major, minor));
        }
    }

    if let Ok(statm) = process.statm() {
        let page = procfs::page_size();
        snapshot.memory_info.shared = Some(statm.shared * page);
        snapshot.memory_info.text = Some(statm.text * page);
        snapshot.memory_info.lib = Some(statm.lib * page);
        snapshot.memory_info.data = Some(statm.data * page);
        snapshot.memory_info.dirty = Some(statm.dt * page);
    }

    if let Ok(count) = process.fd_count() {
        snapshot.num_fds = u32::try_from(count).ok();
    }

    if let Ok(status) = process.status() {
        snapshot.username = Some(status.ruid.to_string());
        snapshot.num_ctx_switches = ContextSwitches {
            voluntary: status.voluntary_ctxt_switches.unwrap_or(0),
            involuntary: status.nonvoluntary_ctxt_switches.unwrap_or(0),
        };
    }
}

/// Maps a tty device number to its usual `/dev` name.
#[cfg(target_os = "linux")]
fn terminal_name(major: i32, minor: i32) -> String {
    match major {
        136..=143 => format!("/dev/pts/{}", (major - 136) * 256 + minor),
        4 if minor < 64 => format!("/dev/tty{}", minor),
        4 => format!("/dev/ttyS{}", minor - 64),
        _ => format!("tty({}:{})", major, minor),
    }
}
