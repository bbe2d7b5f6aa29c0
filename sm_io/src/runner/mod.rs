//! The process supervisor used where no native supervisor takes over.
//!
//! A runner spawns the service's command, appends its output to
//! `<logdir>/<name>.log`, restarts it under a crash-loop backoff, and keeps
//! the liveness record pointed at itself once per second. `stop` finds the
//! runner through that record and kills it.
//!
//! A recorded pid only counts when the process behind it is a runner image
//! (see [`crate::process::is_runner_name`]). Any other live process under
//! that pid is a reused pid, and the record is treated as stale.

pub mod pidfile;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use sm_core::{Backoff, Error, Service};

use crate::process::{find_process, find_runner, kill, wait_for_exit};
use pidfile::{
    PidFileState, READ_ATTEMPTS, READ_RETRY_DELAY, read_pid_file, read_pid_with_retry,
    remove_pid_file_if_owned, write_pid_file,
};

/// How often the liveness record is rewritten.
pub const TICK: Duration = Duration::from_secs(1);
/// Consecutive foreign pids the ticker will evict before giving up.
pub const MAX_RECLAIMS: u32 = 3;
/// Seconds to wait for a killed runner to disappear.
pub const STOP_POLLS: u32 = 10;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Where lifecycle lines and child output go.
struct LogSink {
    file: Option<File>,
}

impl LogSink {
    fn open(path: &Path) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                eprintln!(
                    "[{}] could not open log file '{}': {}",
                    chrono::Local::now().to_rfc3339(),
                    path.display(),
                    e
                );
                Self { file: None }
            }
        }
    }

    fn line(&mut self, msg: &str) {
        let stamped = format!("[{}] {}\n", chrono::Local::now().to_rfc3339(), msg);
        let written = match self.file.as_mut() {
            Some(file) => file.write_all(stamped.as_bytes()).is_ok(),
            None => false,
        };
        if !written {
            eprint!("{}", stamped);
        }
    }

    /// stdout and stderr handles for the child, if the log file is usable.
    fn child_stdio(&self) -> Option<(Stdio, Stdio)> {
        let file = self.file.as_ref()?;
        let out = file.try_clone().ok()?;
        let err = file.try_clone().ok()?;
        Some((Stdio::from(out), Stdio::from(err)))
    }
}

/// Supervises one service until it stops for good or the runner is told to
/// shut down.
pub struct Supervisor {
    svc: Service,
    backoff: Backoff,
}

impl Supervisor {
    pub fn new(svc: Service) -> Self {
        Self {
            svc,
            backoff: Backoff::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(mut self) -> Result<(), Error> {
        let logdir = self.svc.logdir.clone();
        fs::create_dir_all(&logdir).map_err(|e| Error::LogDirUnavailable {
            path: logdir.clone(),
            message: e.to_string(),
        })?;

        let pid_path = self.svc.pid_file();
        let own = std::process::id();
        if let PidFileState::Pid(other) = read_pid_file(&pid_path)
            && other != own
        {
            if let Some(process) = find_runner(other) {
                return Err(Error::AlreadyRunning {
                    name: self.svc.name.clone(),
                    pid: other,
                    exe: process.exe,
                });
            }
            debug!(pid = other, path = %pid_path.display(), "overwriting stale pid file");
        }

        write_pid_file(&pid_path, own)?;
        let ticker = tokio::spawn(keep_pid_file(pid_path.clone(), own));

        let result = self.supervise().await;

        ticker.abort();
        remove_pid_file_if_owned(&pid_path, own);
        result
    }

    async fn supervise(&mut self) -> Result<(), Error> {
        let mut log = LogSink::open(&self.svc.log_file());
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            let (program, args) = self.svc.command_line();
            let started = Instant::now();
            log.line(&format!("starting '{}' {}", program, args.join(" ")));

            match self.command(&log).spawn() {
                Ok(mut child) => {
                    tokio::select! {
                        status = child.wait() => match status {
                            Ok(status) if status.success() => log.line("process exited cleanly"),
                            Ok(status) => log.line(&format!("process exited with error: {}", status)),
                            Err(e) => log.line(&format!("lost track of process: {}", e)),
                        },
                        _ = &mut shutdown => {
                            log.line("runner received shutdown signal, killing process");
                            if let Err(e) = child.kill().await {
                                warn!(error = %e, "failed to kill child");
                            }
                            return Ok(());
                        }
                    }
                }
                Err(e) => log.line(&format!("failed to start '{}': {}", program, e)),
            }

            if !self.svc.restart {
                log.line("not restarting");
                return Ok(());
            }

            match self.backoff.record_exit(started.elapsed()) {
                None => log.line("restarting"),
                Some(wait) => {
                    log.line(&format!(
                        "exited too quickly ({} in a row), waiting {:?} before restarting",
                        self.backoff.failures(),
                        wait
                    ));
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = &mut shutdown => {
                            log.line("runner received shutdown signal");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn command(&self, log: &LogSink) -> Command {
        let (program, args) = self.svc.command_line();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.svc.envs)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.svc.workdir {
            cmd.current_dir(dir);
        }
        match log.child_stdio() {
            Some((out, err)) => {
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        #[cfg(target_os = "linux")]
        {
            let hook = || {
                // SAFETY: prctl is async-signal-safe and only affects the child.
                unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
                Ok(())
            };
            // SAFETY: the hook performs no allocation or locking.
            unsafe {
                cmd.pre_exec(hook);
            }
        }
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }
}

/// Run a service in the foreground under the supervisor.
pub async fn start(svc: &Service) -> Result<(), Error> {
    info!(name = %svc.name, "supervising");
    Supervisor::new(svc.clone()).run().await
}

/// Kill the runner named by the service's liveness record.
pub async fn stop(svc: &Service) -> Result<(), Error> {
    let path = svc.pid_file();
    let pid = read_pid_with_retry(&path, READ_ATTEMPTS, READ_RETRY_DELAY).await?;
    let Some(process) = find_runner(pid) else {
        if let Some(other) = find_process(pid) {
            warn!(pid, exe = %other.exe, "pid file names a process that is not a runner, leaving it alone");
        }
        return Err(Error::ProcessNotFound { pid });
    };

    kill_and_wait(pid, &process.exe).await?;
    info!(name = %svc.name, pid, "stopped runner");
    Ok(())
}

/// Stop whatever runner is recorded, then supervise again.
pub async fn restart(svc: &Service) -> Result<(), Error> {
    if let Err(e) = stop(svc).await {
        debug!(error = %e, "nothing to stop before restart");
    }
    start(svc).await
}

/// Re-invoke the current executable as `run --config <config>`, detached
/// from this terminal, and return the new process id.
pub fn daemonize(config: &Path) -> Result<u32, Error> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::io("could not locate the running executable", e))?;
    daemonize_exe(&exe, config)
}

pub fn daemonize_exe(exe: &Path, config: &Path) -> Result<u32, Error> {
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("run")
        .arg("--config")
        .arg(config)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let hook = || {
            // SAFETY: setsid is async-signal-safe.
            unsafe { libc::setsid() };
            Ok(())
        };
        // SAFETY: the hook performs no allocation or locking.
        unsafe {
            cmd.pre_exec(hook);
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::io(format!("failed to launch {}", exe.display()), e))?;
    debug!(pid = child.id(), config = %config.display(), "daemonized runner");
    Ok(child.id())
}

async fn kill_and_wait(pid: u32, exe: &str) -> Result<(), Error> {
    kill(pid).await?;
    if wait_for_exit(pid, STOP_POLLS, TICK).await {
        Ok(())
    } else {
        Err(Error::ProcessWontDie {
            pid,
            exe: exe.to_string(),
        })
    }
}

/// Rewrite the liveness record every tick, evicting a different live runner
/// that claims it. Pids that are not runners are simply overwritten.
async fn keep_pid_file(path: PathBuf, own: u32) {
    let mut reclaims = 0;

    loop {
        tokio::time::sleep(TICK).await;

        match read_pid_file(&path) {
            PidFileState::Pid(other) if other != own => {
                if let Some(process) = find_runner(other) {
                    reclaims += 1;
                    if reclaims > MAX_RECLAIMS {
                        error!(
                            path = %path.display(),
                            pid = other,
                            "pid file keeps being taken over, no longer reclaiming it"
                        );
                        return;
                    }
                    warn!(pid = other, exe = %process.exe, "another runner claims the pid file, stopping it");
                    if let Err(e) = kill_and_wait(other, &process.exe).await {
                        warn!(error = %e, "could not stop competing runner");
                    }
                } else {
                    reclaims = 0;
                }
            }
            _ => reclaims = 0,
        }

        if let Err(e) = write_pid_file(&path, own) {
            warn!(error = %e, "failed to refresh pid file");
        }
    }
}

/// Resolves on SIGTERM or Ctrl-C. Never resolves if neither can be watched.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = term.recv() => return,
                res = tokio::signal::ctrl_c() => {
                    if res.is_ok() {
                        return;
                    }
                }
            }
            term.recv().await;
            return;
        }
    }
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
