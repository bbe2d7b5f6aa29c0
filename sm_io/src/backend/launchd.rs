use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use sm_core::{Error, Service};

use super::{
    Backend, ListResult, MARKER, check_port_policy, ensure_logdir, require_home, resolve_in,
    scan_units, write_unit,
};
use crate::privilege::adjust_privileges;
use crate::runnable::{Runnable, run_all};
use crate::traits::CommandRunner;

pub const SYSTEM_DIR: &str = "/Library/LaunchDaemons";
/// Relative to the caller's home directory.
pub const USER_DIR: &str = "Library/LaunchAgents";
pub const EXT: &str = ".plist";

pub struct LaunchdBackend {
    runner: Arc<dyn CommandRunner>,
    system_dir: PathBuf,
    privileged: bool,
}

impl LaunchdBackend {
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

    /// Property lists are named after the reverse-DNS label.
    fn resolve(&self, svc: &Service) -> Result<(bool, PathBuf), Error> {
        let user_dir = svc.home.as_deref().map(Self::user_dir);
        let (matched, path) = resolve_in(
            svc.scope(),
            &svc.reverse_dns,
            EXT,
            &self.system_dir,
            user_dir.as_deref(),
        )?;
        Ok((matched.scope.is_system(), path))
    }

    pub fn start_commands(&self, system: bool, plist: &Path) -> Vec<Runnable> {
        let plist = plist.to_string_lossy().into_owned();
        let cmds = vec![
            Runnable::best_effort("launchctl", ["unload", "-w", plist.as_str()]),
            Runnable::must("launchctl", ["load", "-w", plist.as_str()])
                .badwords(&["No such file or directory", "service already loaded"]),
        ];
        adjust_privileges(system, self.privileged, cmds)
    }

    pub fn stop_commands(&self, system: bool, plist: &Path) -> Vec<Runnable> {
        let plist = plist.to_string_lossy().into_owned();
        let cmds = vec![
            Runnable::must("launchctl", ["unload", "-w", plist.as_str()])
                .tolerate(&[
                    "No such file or directory",
                    "Could not find specified service",
                    "not loaded",
                ])
                .badwords(&["Operation not permitted", "failed"]),
        ];
        adjust_privileges(system, self.privileged, cmds)
    }
}

#[async_trait]
impl Backend for LaunchdBackend {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn render(&self, svc: &Service) -> Result<String, Error> {
        Ok(render_plist(svc))
    }

    fn install_commands(&self, svc: &Service) -> Result<Vec<Runnable>, Error> {
        let path = self
            .scope_dir(svc)?
            .join(format!("{}{}", svc.reverse_dns, EXT));
        Ok(self.start_commands(svc.system, &path))
    }

    async fn install(&self, svc: &mut Service) -> Result<&'static str, Error> {
        check_port_policy(svc)?;
        svc.normalize_without_path(svc.home.clone())?;

        let path = self
            .scope_dir(svc)?
            .join(format!("{}{}", svc.reverse_dns, EXT));
        let plist = self.render(svc)?;
        write_unit(&path, &plist)?;
        ensure_logdir(svc)?;
        info!(plist = %path.display(), "installed launchd property list");

        run_all(&self.install_commands(svc)?, self.runner.as_ref()).await?;
        Ok(self.name())
    }

    async fn start(&self, svc: &Service) -> Result<(), Error> {
        let (system, path) = self.resolve(svc)?;
        run_all(&self.start_commands(system, &path), self.runner.as_ref()).await
    }

    async fn stop(&self, svc: &Service) -> Result<(), Error> {
        let (system, path) = self.resolve(svc)?;
        run_all(&self.stop_commands(system, &path), self.runner.as_ref()).await?;
        info!(plist = %path.display(), "stopped");
        Ok(())
    }

    async fn list(&self, svc: &Service) -> Result<ListResult, Error> {
        Ok(scan_units(&self.scope_dir(svc)?, EXT))
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn key_string(plist: &mut String, key: &str, value: &str) {
    let _ = writeln!(plist, "\t<key>{}</key>", key);
    let _ = writeln!(plist, "\t<string>{}</string>", xml_escape(value));
}

/// Render a property list. Output depends only on the descriptor.
pub fn render_plist(svc: &Service) -> String {
    let mut plist = String::new();
    plist.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        plist,
        "<!-- Generated {} Edit as you wish, but leave this line. -->",
        MARKER
    );
    plist.push_str("<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n");
    plist.push_str("<plist version=\"1.0\">\n<dict>\n");

    key_string(&mut plist, "Label", &svc.reverse_dns);

    let (program, args) = svc.command_line();
    plist.push_str("\t<key>ProgramArguments</key>\n\t<array>\n");
    for word in std::iter::once(&program).chain(args.iter()) {
        let _ = writeln!(plist, "\t\t<string>{}</string>", xml_escape(word));
    }
    plist.push_str("\t</array>\n");

    if svc.system {
        if let Some(user) = &svc.user {
            key_string(&mut plist, "UserName", user);
        }
        if let Some(group) = &svc.group {
            key_string(&mut plist, "GroupName", group);
        }
    }
    if let Some(workdir) = &svc.workdir {
        key_string(&mut plist, "WorkingDirectory", &workdir.to_string_lossy());
    }
    if !svc.envs.is_empty() {
        plist.push_str("\t<key>EnvironmentVariables</key>\n\t<dict>\n");
        for (key, value) in &svc.envs {
            let _ = writeln!(plist, "\t\t<key>{}</key>", xml_escape(key));
            let _ = writeln!(plist, "\t\t<string>{}</string>", xml_escape(value));
        }
        plist.push_str("\t</dict>\n");
    }

    plist.push_str("\t<key>RunAtLoad</key>\n\t<true/>\n");
    let _ = writeln!(
        plist,
        "\t<key>KeepAlive</key>\n\t<{}/>",
        if svc.restart { "true" } else { "false" }
    );

    let log = svc.log_file().to_string_lossy().into_owned();
    key_string(&mut plist, "StandardOutPath", &log);
    key_string(&mut plist, "StandardErrorPath", &log);

    plist.push_str("</dict>\n</plist>\n");
    plist
}
