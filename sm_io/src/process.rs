//! Process table lookups and termination.

use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::debug;

use sm_core::Error;

/// A live process found in the process table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub exe: String,
}

/// Look up a live process by pid. Zombies count as gone.
pub fn find_process(pid: u32) -> Option<ProcessInfo> {
    if pid == 0 {
        return None;
    }

    let mut system = System::new();
    let sysinfo_pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        true,
        ProcessRefreshKind::new(),
    );

    let process = system.process(sysinfo_pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }
    Some(ProcessInfo {
        pid,
        exe: process.name().to_string_lossy().into_owned(),
    })
}

/// Process names are truncated to this many bytes on Linux.
const COMM_LEN: usize = 15;

/// Whether a process name belongs to a serviceman runner: anything named
/// `serviceman*`, or the image this process itself was started from.
pub fn is_runner_name(name: &str) -> bool {
    let name = name.to_lowercase();
    if name.starts_with("serviceman") {
        return true;
    }
    let Some(own) = own_image_name() else {
        return false;
    };
    own == name || (name.len() >= COMM_LEN && own.starts_with(&name))
}

fn own_image_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.file_name()?.to_string_lossy().to_lowercase())
}

/// Like [`find_process`], but only a live serviceman runner counts.
pub fn find_runner(pid: u32) -> Option<ProcessInfo> {
    let process = find_process(pid)?;
    if is_runner_name(&process.exe) {
        Some(process)
    } else {
        debug!(pid, exe = %process.exe, "live pid is not a runner");
        None
    }
}

/// Kill a process outright. On Windows the whole process tree goes with it.
#[cfg(unix)]
pub async fn kill(pid: u32) -> Result<(), Error> {
    debug!(pid, "sending SIGKILL");
    let raw = libc::pid_t::try_from(pid).map_err(|_| Error::ProcessNotFound { pid })?;
    // SAFETY: kill(2) takes plain integers; a stale pid just yields ESRCH.
    let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(Error::ProcessNotFound { pid });
        }
        return Err(Error::io(format!("failed to kill pid {}", pid), err));
    }
    Ok(())
}

#[cfg(windows)]
pub async fn kill(pid: u32) -> Result<(), Error> {
    use crate::runnable::Runnable;
    use crate::traits::SystemCommandRunner;

    debug!(pid, "running taskkill");
    Runnable::must("taskkill", ["/pid".to_string(), pid.to_string(), "/T".to_string(), "/F".to_string()])
        .run(&SystemCommandRunner)
        .await
}

/// Poll once per `interval` until `pid` disappears or `attempts` run out.
///
/// Returns whether the process is gone.
pub async fn wait_for_exit(pid: u32, attempts: u32, interval: Duration) -> bool {
    for _ in 0..attempts {
        if find_process(pid).is_none() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    find_process(pid).is_none()
}
