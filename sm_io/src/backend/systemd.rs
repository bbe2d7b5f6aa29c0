use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use sm_core::{Error, Scope, Service};

use super::{
    Backend, ListResult, MARKER, check_port_policy, ensure_logdir, require_home, resolve_in,
    scan_units, write_unit,
};
use crate::privilege::adjust_privileges;
use crate::runnable::{Runnable, run_all};
use crate::traits::CommandRunner;

pub const SYSTEM_DIR: &str = "/etc/systemd/system";
/// Relative to the caller's home directory.
pub const USER_DIR: &str = ".config/systemd/user";
pub const EXT: &str = ".service";

const START_BADWORDS: &[&str] = &["not found", "failed"];
/// A unit that is already gone counts as stopped.
const STOP_TOLERATED: &[&str] = &["not loaded", "not found"];
const STOP_BADWORDS: &[&str] = &["Failed to stop", "failed"];

pub struct SystemdBackend {
    runner: Arc<dyn CommandRunner>,
    system_dir: PathBuf,
    privileged: bool,
}

impl SystemdBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, privileged: bool) -> Self {
        Self::with_paths(runner, PathBuf::from(SYSTEM_DIR), privileged)
    }

    pub fn with_paths(runner: Arc<dyn CommandRunner>, system_dir: PathBuf, privileged: bool) -> Self {
        Self {
            runner,
            system_dir,
            privileged,
        }
    }

    fn user_dir(home: &Path) -> PathBuf {
        home.join(USER_DIR)
    }

    fn scope_dir(&self, svc: &Service) -> Result<PathBuf, Error> {
        if svc.system {
            Ok(self.system_dir.clone())
        } else {
            Ok(Self::user_dir(require_home(svc)?))
        }
    }

    fn resolve(&self, svc: &Service) -> Result<(Scope, String), Error> {
        let user_dir = svc.home.as_deref().map(Self::user_dir);
        let (matched, _) = resolve_in(
            svc.scope(),
            &svc.name,
            EXT,
            &self.system_dir,
            user_dir.as_deref(),
        )?;
        Ok((matched.scope, matched.file_name))
    }

    fn systemctl(scope: Scope, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if scope == Scope::User {
            full.push("--user".to_string());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// The commands `start` issues for a resolved unit.
    pub fn start_commands(&self, scope: Scope, unit: &str) -> Vec<Runnable> {
        let cmds = vec![
            Runnable::best_effort("systemctl", Self::systemctl(scope, &["daemon-reload"])),
            Runnable::best_effort("systemctl", Self::systemctl(scope, &["stop", unit])),
            Runnable::best_effort("systemctl", Self::systemctl(scope, &["enable", unit])),
            Runnable::must("systemctl", Self::systemctl(scope, &["start", unit]))
                .badwords(START_BADWORDS),
        ];
        adjust_privileges(scope.is_system(), self.privileged, cmds)
    }

    pub fn stop_commands(&self, scope: Scope, unit: &str) -> Vec<Runnable> {
        let cmds = vec![
            Runnable::must("systemctl", Self::systemctl(scope, &["stop", unit]))
                .tolerate(STOP_TOLERATED)
                .badwords(STOP_BADWORDS),
        ];
        adjust_privileges(scope.is_system(), self.privileged, cmds)
    }
}

#[async_trait]
impl Backend for SystemdBackend {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn render(&self, svc: &Service) -> Result<String, Error> {
        Ok(render_unit(svc))
    }

    fn install_commands(&self, svc: &Service) -> Result<Vec<Runnable>, Error> {
        let unit = format!("{}{}", svc.name, EXT);
        Ok(self.start_commands(svc.scope(), &unit))
    }

    async fn install(&self, svc: &mut Service) -> Result<&'static str, Error> {
        check_port_policy(svc)?;
        svc.normalize_without_path(svc.home.clone())?;

        let path = self
            .scope_dir(svc)?
            .join(format!("{}{}", svc.name, EXT));
        let unit = self.render(svc)?;
        write_unit(&path, &unit)?;
        ensure_logdir(svc)?;
        info!(unit = %path.display(), "installed systemd unit");

        run_all(&self.install_commands(svc)?, self.runner.as_ref()).await?;
        Ok(self.name())
    }

    async fn start(&self, svc: &Service) -> Result<(), Error> {
        let (scope, unit) = self.resolve(svc)?;
        run_all(&self.start_commands(scope, &unit), self.runner.as_ref()).await
    }

    async fn stop(&self, svc: &Service) -> Result<(), Error> {
        let (scope, unit) = self.resolve(svc)?;
        run_all(&self.stop_commands(scope, &unit), self.runner.as_ref()).await?;
        info!(unit, "stopped");
        Ok(())
    }

    async fn list(&self, svc: &Service) -> Result<ListResult, Error> {
        Ok(scan_units(&self.scope_dir(svc)?, EXT))
    }
}

/// Quote a word for `ExecStart=`.
fn exec_quote(word: &str) -> String {
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let plain = !escaped.is_empty()
        && !escaped
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\' || c == ';');
    if plain {
        escaped
    } else {
        format!("\"{}\"", escaped.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn env_assignment(key: &str, value: &str) -> String {
    let pair = format!("{}={}", key, value)
        .replace('%', "%%")
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("\"{}\"", pair)
}

/// Render a unit file. Output depends only on the descriptor.
pub fn render_unit(svc: &Service) -> String {
    let mut unit = String::new();
    let _ = writeln!(
        unit,
        "# Generated {} Edit as you wish, but leave this line.",
        MARKER
    );
    unit.push_str("[Unit]\n");
    match &svc.desc {
        Some(desc) => {
            let _ = writeln!(unit, "Description={} - {}", svc.title, desc);
        }
        None => {
            let _ = writeln!(unit, "Description={}", svc.title);
        }
    }
    if let Some(url) = &svc.url {
        let _ = writeln!(unit, "Documentation={}", url);
    }
    unit.push_str("After=network-online.target\n");
    unit.push_str("Wants=network-online.target\n");

    unit.push_str("\n[Service]\n");
    unit.push_str("Type=simple\n");
    if svc.restart {
        unit.push_str("Restart=always\n");
        unit.push_str("RestartSec=1\n");
    }
    if svc.system {
        if let Some(user) = &svc.user {
            let _ = writeln!(unit, "User={}", user);
        }
        if let Some(group) = &svc.group {
            let _ = writeln!(unit, "Group={}", group);
        }
    }
    if let Some(workdir) = &svc.workdir {
        let _ = writeln!(unit, "WorkingDirectory={}", workdir.display());
    }
    for (key, value) in &svc.envs {
        let _ = writeln!(unit, "Environment={}", env_assignment(key, value));
    }

    let (program, args) = svc.command_line();
    let mut exec_start = exec_quote(&program);
    for arg in &args {
        exec_start.push(' ');
        exec_start.push_str(&exec_quote(arg));
    }
    let _ = writeln!(unit, "ExecStart={}", exec_start);

    if svc.privileged_ports {
        unit.push_str("AmbientCapabilities=CAP_NET_BIND_SERVICE\n");
        unit.push_str("CapabilityBoundingSet=CAP_NET_BIND_SERVICE\n");
        unit.push_str("NoNewPrivileges=true\n");
    }
    if svc.multiuser_protection {
        unit.push_str("PrivateTmp=true\n");
        unit.push_str("PrivateDevices=true\n");
        unit.push_str("ProtectHome=true\n");
        unit.push_str("ProtectSystem=full\n");
    }

    unit.push_str("\n[Install]\n");
    if svc.system {
        unit.push_str("WantedBy=multi-user.target\n");
    } else {
        unit.push_str("WantedBy=default.target\n");
    }
    unit
}
