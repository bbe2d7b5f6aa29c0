//! Integration tests for installing and controlling services.
//!
//! These drive the backends against a temporary home directory with a
//! recording command runner, and the `serviceman` binary's runner against a
//! real shell script. Tests focus on:
//!
//! - User-scope installs and what they leave on disk
//! - Listing managed and foreign units
//! - Policy refusals before anything is written
//! - `sudo` prefixing for system-scope actions
//! - Stopping a live runner through its liveness record
//!
//! Run with: `cargo test --test integration_services`

use std::fs;

use sm_core::Error;
use sm_io::Backend;
use sm_io::test_utils::TestContext;

// ============================================================================
// Install and list
// ============================================================================

#[tokio::test]
async fn user_install_creates_log_dir_and_lists_as_managed() {
    let ctx = TestContext::new();
    let backend = ctx.systemd(false);
    let mut svc = ctx.demo_service("demo");

    let kind = backend.install(&mut svc).await.unwrap();
    assert_eq!(kind, "systemd");

    let logdir = ctx.home().join(".local/share/demo/var/log");
    assert!(logdir.is_dir(), "log dir should exist: {}", logdir.display());
    assert!(ctx.home().join(".config/systemd/user/demo.service").exists());

    let calls = ctx.runner.calls();
    assert!(
        calls.iter().any(|c| c == "systemctl --user start demo.service"),
        "calls: {:?}",
        calls
    );

    let listed = backend.list(&ctx.lookup("demo", false)).await.unwrap();
    assert_eq!(listed.managed, vec!["demo"]);
    assert!(listed.others.is_empty());
}

#[tokio::test]
async fn stopped_service_is_still_listed() {
    let ctx = TestContext::new();
    let backend = ctx.systemd(false);
    let mut svc = ctx.demo_service("demo");
    backend.install(&mut svc).await.unwrap();

    backend.stop(&ctx.lookup("demo", false)).await.unwrap();
    assert!(
        ctx.runner
            .calls()
            .iter()
            .any(|c| c == "systemctl --user stop demo.service")
    );

    let listed = backend.list(&ctx.lookup("demo", false)).await.unwrap();
    assert_eq!(listed.managed, vec!["demo"]);
}

#[tokio::test]
async fn foreign_units_are_listed_separately() {
    let ctx = TestContext::new();
    let backend = ctx.systemd(false);
    let mut svc = ctx.demo_service("demo");
    backend.install(&mut svc).await.unwrap();
    ctx.write_foreign_unit(&ctx.home().join(".config/systemd/user"), "other.service");

    let listed = backend.list(&ctx.lookup("demo", false)).await.unwrap();
    assert_eq!(listed.managed, vec!["demo"]);
    assert_eq!(listed.others, vec!["other"]);
}

#[test]
fn dryrun_script_matches_what_install_runs() {
    let ctx = TestContext::new();
    let backend = ctx.systemd(false);
    let svc = ctx.demo_service("demo");

    let script = sm_io::render_all(&backend.install_commands(&svc).unwrap());
    assert_eq!(
        script,
        "systemctl --user daemon-reload || true\n\
         systemctl --user stop demo.service || true\n\
         systemctl --user enable demo.service || true\n\
         systemctl --user start demo.service || exit\n\
         # output must not contain 'not found'\n\
         # output must not contain 'failed'"
    );
}

#[tokio::test]
async fn launchd_user_install_writes_plist() {
    let ctx = TestContext::new();
    let backend = ctx.launchd(false);
    let mut svc = ctx.demo_service("demo");

    assert_eq!(backend.install(&mut svc).await.unwrap(), "launchd");

    let plist = ctx.home().join("Library/LaunchAgents/demo.plist");
    let contents = fs::read_to_string(&plist).unwrap();
    assert!(contents.contains("<string>demo</string>"));
    assert!(ctx.home().join(".local/share/demo/var/log").is_dir());
    assert!(
        ctx.runner
            .calls()
            .iter()
            .any(|c| c.starts_with("launchctl load -w"))
    );
}

// ============================================================================
// Policy
// ============================================================================

#[tokio::test]
async fn privileged_ports_refused_by_every_backend() {
    let ctx = TestContext::new();
    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(ctx.systemd(false)),
        Box::new(ctx.launchd(false)),
        Box::new(ctx.windows()),
    ];

    for backend in backends {
        let mut svc = ctx.demo_service("demo");
        svc.privileged_ports = true;

        let err = backend.install(&mut svc).await.unwrap_err();
        assert!(
            matches!(err, Error::PolicyViolation { .. }),
            "{} allowed privileged ports: {:?}",
            backend.name(),
            err
        );
    }

    assert!(!ctx.home().join(".config").exists());
    assert!(!ctx.home().join("Library").exists());
    assert!(!ctx.home().join(".local/share").exists());
    assert!(!ctx.home().join(".local/opt").exists());
    assert!(ctx.runner.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unwritable_log_dir_is_an_environment_error() {
    use sm_io::test_utils::{create_readonly_dir, restore_write_permissions};

    if sm_io::is_privileged() {
        return;
    }
    let ctx = TestContext::new();
    let share = create_readonly_dir(&ctx.home().join(".local"), "share").unwrap();
    let backend = ctx.systemd(false);
    let mut svc = ctx.demo_service("demo");

    let err = backend.install(&mut svc).await.unwrap_err();
    restore_write_permissions(&share).unwrap();

    assert!(matches!(err, Error::LogDirUnavailable { .. }));
    assert!(err.is_environment());
}

// ============================================================================
// Privilege adjustment
// ============================================================================

#[tokio::test]
async fn unprivileged_system_start_uses_sudo() {
    let ctx = TestContext::new();
    ctx.write_foreign_unit(&ctx.system_dir(), "demo.service");
    let backend = ctx.systemd(false);

    backend.start(&ctx.lookup("demo", true)).await.unwrap();

    let calls = ctx.runner.calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| c.starts_with("sudo systemctl ")));
    assert!(calls.contains(&"sudo systemctl start demo.service".to_string()));
}

#[tokio::test]
async fn privileged_system_start_runs_directly() {
    let ctx = TestContext::new();
    ctx.write_foreign_unit(&ctx.system_dir(), "demo.service");
    let backend = ctx.systemd(true);

    backend.start(&ctx.lookup("demo", true)).await.unwrap();

    let calls = ctx.runner.calls();
    assert!(calls.iter().all(|c| c.starts_with("systemctl ")));
}

#[tokio::test]
async fn failed_start_reports_tool_output() {
    let ctx = TestContext::new();
    let backend = ctx.systemd(false);
    let mut svc = ctx.demo_service("demo");
    ctx.runner
        .fail_when("start demo.service", "Job for demo.service failed");

    let err = backend.install(&mut svc).await.unwrap_err();
    match err {
        Error::CommandFailed { output, .. } => assert!(output.contains("failed")),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
}

// ============================================================================
// Runner end to end
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn stop_kills_a_live_runner() {
    use std::process::{Command, Stdio};
    use std::time::Duration;

    use sm_io::process::find_process;
    use sm_io::runner::pidfile::{PidFileState, read_pid_file};

    let ctx = TestContext::new();
    let svc = ctx.demo_service("demo");
    let config = ctx.home().join("demo.json");
    sm_io::save_config(&config, &svc).unwrap();

    let mut runner = Command::new(env!("CARGO_BIN_EXE_serviceman"))
        .args(["run", "--config"])
        .arg(&config)
        .env("HOME", ctx.home())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let runner_pid = runner.id();

    let mut recorded = PidFileState::Missing;
    for _ in 0..50 {
        recorded = read_pid_file(&svc.pid_file());
        if recorded == PidFileState::Pid(runner_pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(recorded, PidFileState::Pid(runner_pid));

    sm_io::runner::stop(&svc).await.unwrap();
    let status = runner.wait().unwrap();
    assert!(!status.success());

    if let PidFileState::Pid(pid) = read_pid_file(&svc.pid_file()) {
        assert!(find_process(pid).is_none(), "pid {} is still alive", pid);
    }
}

#[tokio::test]
async fn stop_without_runner_is_no_pid_file() {
    let ctx = TestContext::new();
    let svc = ctx.demo_service("demo");

    let err = sm_io::runner::stop(&svc).await.unwrap_err();
    assert!(matches!(err, Error::NoPidFile { .. }));
}
