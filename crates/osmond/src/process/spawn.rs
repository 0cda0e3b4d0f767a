//! Launching task processes and reading their pidfiles.

use std::path::Path;
use std::process::Stdio;

use osmon_core::TaskDescriptor;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::ProcessError;

/// Builds the argument vector for a task.
///
/// Scripts are prefixed with their interpreter and must exist. Native
/// executables must exist and carry at least one execute bit.
pub fn build_argv(task: &TaskDescriptor) -> Result<Vec<String>, ProcessError> {
    let process = task.process.as_path();
    let mut argv = Vec::with_capacity(task.arguments.len() + 2);

    match task.script_interpreter() {
        Some(interpreter) => {
            if !process.exists() {
                return Err(ProcessError::NotFound(process.to_path_buf()));
            }
            argv.push(interpreter.to_string_lossy().into_owned());
        }
        None => check_executable(process)?,
    }

    argv.push(process.to_string_lossy().into_owned());
    argv.extend(task.arguments.iter().cloned());
    Ok(argv)
}

#[cfg(unix)]
fn check_executable(path: &Path) -> Result<(), ProcessError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata =
        std::fs::metadata(path).map_err(|_| ProcessError::NotFound(path.to_path_buf()))?;
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(ProcessError::NotExecutable(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_executable(path: &Path) -> Result<(), ProcessError> {
    if !path.exists() {
        return Err(ProcessError::NotFound(path.to_path_buf()));
    }
    Ok(())
}

/// Launches a task process with its argument vector.
///
/// stdin is closed; stdout and stderr are inherited from the daemon.
pub fn launch(task: &TaskDescriptor, argv: &[String]) -> Result<Child, ProcessError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ProcessError::NotFound(task.process.clone()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&task.environment)
        .stdin(Stdio::null())
        .kill_on_drop(false);

    if let Some(ref cwd) = task.cwd {
        command.current_dir(cwd);
    }

    #[cfg(unix)]
    apply_credentials(&mut command, task);

    debug!(task = %task.name, argv = ?argv, "Launching process");

    command.spawn().map_err(|e| ProcessError::Spawn {
        path: task.process.clone(),
        reason: e.to_string(),
    })
}

/// Switches uid/gid only when they differ from the daemon's own.
#[cfg(unix)]
fn apply_credentials(command: &mut Command, task: &TaskDescriptor) {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail
    let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };

    if let Some(gid) = task.group.filter(|gid| *gid != egid) {
        command.gid(gid);
    }
    if let Some(uid) = task.user.filter(|uid| *uid != euid) {
        command.uid(uid);
    }
}

/// Checks whether a running process's command line belongs to a task.
///
/// The executable must match exactly or by file name (interpreters are
/// often resolved through `PATH`), and the last `expected.len() - 1`
/// entries must equal the configured arguments. Anything the runtime
/// inserted between the executable and the script is ignored.
pub fn command_line_matches(expected: &[String], actual: &[String]) -> bool {
    let (Some((expected_exe, expected_args)), Some((actual_exe, actual_args))) =
        (expected.split_first(), actual.split_first())
    else {
        return false;
    };

    if actual_args.len() < expected_args.len() {
        return false;
    }

    let same_exe = expected_exe == actual_exe
        || Path::new(expected_exe).file_name() == Path::new(actual_exe).file_name();
    if !same_exe {
        return false;
    }

    let tail = &actual_args[actual_args.len() - expected_args.len()..];
    tail == expected_args
}

/// Reads a PID from a pidfile.
///
/// Returns `None` when the file is missing, unreadable or does not hold
/// a positive integer.
pub fn read_pidfile(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            debug!(path = %path.display(), "Pidfile does not hold a valid PID");
            None
        }
    }
}

/// Removes a stale pidfile. Missing files are not an error.
pub fn remove_pidfile(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale pidfile"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale pidfile"),
    }
}
