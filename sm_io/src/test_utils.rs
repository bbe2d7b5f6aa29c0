//! Test utilities for serviceman
//!
//! This module provides common test infrastructure for integration tests:
//!
//! - `TestContext` - Wraps a TempDir laid out as a fake home plus system unit directories
//! - `RecordingRunner` - A `CommandRunner` that records every shell-out instead of running it
//! - Service fixtures - Descriptors for a shell-script demo service
//! - Filesystem helpers - Readonly directories for permission failures
//! - `spawn_runner_lookalike` - A live process that passes for a runner
//!
//! # Example
//!
//! ```ignore
//! use sm_io::test_utils::TestContext;
//!
//! #[tokio::test]
//! async fn test_install() {
//!     let ctx = TestContext::new();
//!     let backend = ctx.systemd(false);
//!     let mut svc = ctx.demo_service("demo");
//!
//!     backend.install(&mut svc).await.unwrap();
//!     assert!(ctx.runner.calls().iter().any(|c| c.contains("start demo.service")));
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use sm_core::{Error, Service};

use crate::backend::{LaunchdBackend, SystemdBackend, WindowsBackend};
use crate::traits::{CommandOutput, CommandRunner};

// ============================================================================
// RecordingRunner
// ============================================================================

/// Records `program args...` lines and answers from a scripted table.
///
/// Commands succeed with empty output unless a rule added with
/// [`RecordingRunner::fail_when`] matches their command line.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any command whose line contains `pattern` fail with `output`.
    pub fn fail_when(&self, pattern: &str, output: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push((pattern.to_string(), output.to_string()));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        let failure = self.failures.lock().ok().and_then(|failures| {
            failures
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())
        });
        Ok(match failure {
            Some(output) => CommandOutput::failed(output),
            None => CommandOutput::ok(""),
        })
    }
}

// ============================================================================
// Filesystem helpers
// ============================================================================

/// Create a directory that cannot be written to.
///
/// # Note
/// Root can still write to "read-only" directories, so tests using this
/// should skip themselves when running as root.
pub fn create_readonly_dir(parent: &Path, name: &str) -> std::io::Result<PathBuf> {
    let dir = parent.join(name);
    fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555))?;
    }

    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(&dir)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&dir, perms)?;
    }

    Ok(dir)
}

/// Restore write permissions to a directory (cleanup helper).
pub fn restore_write_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }

    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Start a long sleep under a `serviceman-*` image name, so the process
/// table shows it as a runner. The caller owns the child and must kill it.
#[cfg(unix)]
pub async fn spawn_runner_lookalike(dir: &Path) -> tokio::process::Child {
    let sleep = which::which("sleep").unwrap_or_else(|e| panic!("no sleep binary: {}", e));
    let image = dir.join("serviceman-lookalike");
    if !image.exists() {
        fs::copy(&sleep, &image).unwrap_or_else(|e| panic!("failed to copy sleep: {}", e));
    }

    // A fork elsewhere in the test process may briefly hold the copy open.
    let mut attempts = 0;
    loop {
        match tokio::process::Command::new(&image)
            .arg("30")
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => return child,
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Err(e) => panic!("failed to start lookalike runner: {}", e),
        }
    }
}

// ============================================================================
// TestContext - Main test infrastructure
// ============================================================================

/// A temporary directory laid out as:
///
/// - `home/` - the caller's home directory
/// - `system/` - stand-in for the system-wide unit directory
/// - `bin/` - scripts and a fake serviceman executable
pub struct TestContext {
    pub tmp: TempDir,
    pub runner: Arc<RecordingRunner>,
}

impl TestContext {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|e| panic!("failed to create temp dir: {}", e));
        for dir in ["home", "system", "bin"] {
            fs::create_dir_all(tmp.path().join(dir))
                .unwrap_or_else(|e| panic!("failed to create {}: {}", dir, e));
        }
        Self {
            tmp,
            runner: Arc::new(RecordingRunner::new()),
        }
    }

    pub fn home(&self) -> PathBuf {
        self.tmp.path().join("home")
    }

    pub fn system_dir(&self) -> PathBuf {
        self.tmp.path().join("system")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.tmp.path().join("bin")
    }

    pub fn systemd(&self, privileged: bool) -> SystemdBackend {
        SystemdBackend::with_paths(self.runner.clone(), self.system_dir(), privileged)
    }

    pub fn launchd(&self, privileged: bool) -> LaunchdBackend {
        LaunchdBackend::with_paths(self.runner.clone(), self.system_dir(), privileged)
    }

    pub fn windows(&self) -> WindowsBackend {
        let exe = self.bin_dir().join("serviceman.exe");
        fs::write(&exe, b"MZ").unwrap_or_else(|e| panic!("failed to write fake exe: {}", e));
        WindowsBackend::with_exe(self.runner.clone(), exe)
    }

    /// Write an executable shell script into `bin/` and return its path.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body))
            .unwrap_or_else(|e| panic!("failed to write script: {}", e));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .unwrap_or_else(|e| panic!("failed to chmod script: {}", e));
        }
        path
    }

    /// A normalized user-scope service running a small shell script.
    pub fn demo_service(&self, name: &str) -> Service {
        let script = self.write_script(&format!("{}.sh", name), "echo started; sleep 30");
        let mut svc = Service {
            name: name.to_string(),
            interpreter: Some("/bin/sh".to_string()),
            exec: script.to_string_lossy().into_owned(),
            workdir: Some(self.bin_dir()),
            restart: true,
            ..Default::default()
        };
        svc.normalize(Some(self.home()), false)
            .unwrap_or_else(|e| panic!("failed to normalize demo service: {}", e));
        svc
    }

    /// A bare descriptor naming an installed service, as `start`/`stop` build it.
    pub fn lookup(&self, name: &str, system: bool) -> Service {
        let mut svc = Service {
            name: name.to_string(),
            exec: name.to_string(),
            system,
            ..Default::default()
        };
        svc.normalize_without_path(Some(self.home()))
            .unwrap_or_else(|e| panic!("failed to normalize lookup: {}", e));
        svc
    }

    /// Drop a unit not written by serviceman into a directory.
    pub fn write_foreign_unit(&self, dir: &Path, file_name: &str) {
        fs::create_dir_all(dir).unwrap_or_else(|e| panic!("failed to create dir: {}", e));
        fs::write(dir.join(file_name), "[Unit]\nDescription=not ours\n")
            .unwrap_or_else(|e| panic!("failed to write unit: {}", e));
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
