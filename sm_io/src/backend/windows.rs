//! Windows has no service manager we can drive without elevation, so a
//! service is a copy of this executable acting as its runner, registered to
//! start at login through the registry's per-user `Run` key.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use sm_core::{Error, Scope, Service, resolve_unit, strip_unit_ext};

use super::{Backend, ListResult, check_port_policy, ensure_logdir, require_home, unit_files};
use crate::config::{load_config, render_config, save_config};
use crate::paths::serviceman_opt;
use crate::runnable::{Runnable, run_all};
use crate::runner;
use crate::traits::CommandRunner;

pub const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";
/// `reg.exe` refuses longer `Run` values.
pub const MAX_RUN_DATA: usize = 260;
pub const EXT: &str = ".json";

pub struct WindowsBackend {
    runner: Arc<dyn CommandRunner>,
    /// Executable copied for each service; the running binary when unset.
    self_exe: Option<PathBuf>,
}

impl WindowsBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, _privileged: bool) -> Self {
        Self {
            runner,
            self_exe: None,
        }
    }

    pub fn with_exe(runner: Arc<dyn CommandRunner>, self_exe: PathBuf) -> Self {
        Self {
            runner,
            self_exe: Some(self_exe),
        }
    }

    fn source_exe(&self) -> Result<PathBuf, Error> {
        match &self.self_exe {
            Some(exe) => Ok(exe.clone()),
            None => std::env::current_exe()
                .map_err(|e| Error::io("could not locate the running executable", e)),
        }
    }

    fn user_only(svc: &Service) -> Result<&Path, Error> {
        if svc.system {
            return Err(Error::Unsupported {
                message: "system services on Windows; use --user".to_string(),
            });
        }
        require_home(svc)
    }

    fn etc_dir(home: &Path) -> PathBuf {
        serviceman_opt(home).join("etc")
    }

    fn bin_path(home: &Path, name: &str) -> PathBuf {
        serviceman_opt(home)
            .join("bin")
            .join(format!("serviceman.{}.exe", name))
    }

    fn sidecar_path(home: &Path, name: &str) -> PathBuf {
        Self::etc_dir(home).join(format!("{}{}", name, EXT))
    }

    fn start_command(home: &Path, name: &str, sidecar: &Path) -> Runnable {
        let bin = Self::bin_path(home, name);
        let sidecar = sidecar.to_string_lossy().into_owned();
        Runnable::must(&bin.to_string_lossy(), ["run", "--config", sidecar.as_str(), "--daemon"])
    }

    /// The `reg add` that registers the runner to start at login.
    pub fn register_command(&self, svc: &Service) -> Result<Runnable, Error> {
        let home = Self::user_only(svc)?;
        let bin = Self::bin_path(home, &svc.name);
        let sidecar = Self::sidecar_path(home, &svc.name);
        let data = format!("\"{}\" run --config {}", bin.display(), sidecar.display());
        if data.chars().count() > MAX_RUN_DATA {
            return Err(Error::PolicyViolation {
                message: format!(
                    "autostart command for '{}' is longer than {} characters",
                    svc.name, MAX_RUN_DATA
                ),
            });
        }
        Ok(Runnable::must(
            "reg",
            [
                "add",
                RUN_KEY,
                "/v",
                svc.title.as_str(),
                "/t",
                "REG_SZ",
                "/d",
                data.as_str(),
                "/f",
            ],
        ))
    }

    /// Find the side-car config for `svc.name` among installed ones.
    fn resolve(&self, svc: &Service) -> Result<(PathBuf, String), Error> {
        let home = Self::user_only(svc)?;
        let etc = Self::etc_dir(home);
        let sidecars = unit_files(&etc, EXT);
        let matched = resolve_unit(Scope::User, &svc.name, EXT, &[], &sidecars)?;
        let name = strip_unit_ext(&matched.file_name, EXT)
            .unwrap_or(&svc.name)
            .to_string();
        Ok((etc.join(&matched.file_name), name))
    }

    async fn registered_titles(&self) -> Result<Vec<String>, Error> {
        let args = vec!["query".to_string(), RUN_KEY.to_string()];
        let out = self.runner.run("reg", &args).await?;
        if !out.success {
            return Err(Error::CommandFailed {
                command: format!("reg query {}", RUN_KEY),
                output: out.combined,
            });
        }
        Ok(parse_reg_query(&out.combined))
    }
}

/// Value names from `reg query` output.
pub fn parse_reg_query(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (name, _) = line.split_once("    REG_")?;
            Some(name.trim_end().to_string())
        })
        .collect()
}

#[async_trait]
impl Backend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn render(&self, svc: &Service) -> Result<String, Error> {
        let register = self.register_command(svc)?;
        Ok(format!(
            "{}\n\n{}\n",
            register.command_line(),
            render_config(svc)?
        ))
    }

    fn install_commands(&self, svc: &Service) -> Result<Vec<Runnable>, Error> {
        let home = Self::user_only(svc)?;
        let sidecar = Self::sidecar_path(home, &svc.name);
        Ok(vec![
            self.register_command(svc)?,
            Self::start_command(home, &svc.name, &sidecar),
        ])
    }

    async fn install(&self, svc: &mut Service) -> Result<&'static str, Error> {
        check_port_policy(svc)?;
        svc.normalize_without_path(svc.home.clone())?;
        let commands = self.install_commands(svc)?;
        let home = Self::user_only(svc)?.to_path_buf();

        if let Err(e) = runner::stop(svc).await {
            debug!(error = %e, "no previous runner to stop");
        }

        let bin = Self::bin_path(&home, &svc.name);
        let sidecar = Self::sidecar_path(&home, &svc.name);
        if let Some(parent) = bin.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }
        let source = self.source_exe()?;
        fs::copy(&source, &bin).map_err(|e| {
            Error::io(
                format!("failed to copy {} to {}", source.display(), bin.display()),
                e,
            )
        })?;
        save_config(&sidecar, svc)?;
        ensure_logdir(svc)?;

        run_all(&commands, self.runner.as_ref()).await?;
        info!(sidecar = %sidecar.display(), "registered autostart entry");
        Ok(self.name())
    }

    async fn start(&self, svc: &Service) -> Result<(), Error> {
        let (sidecar, name) = self.resolve(svc)?;
        let home = Self::user_only(svc)?;
        Self::start_command(home, &name, &sidecar)
            .run(self.runner.as_ref())
            .await
    }

    async fn stop(&self, svc: &Service) -> Result<(), Error> {
        let (sidecar, _) = self.resolve(svc)?;
        let mut installed = load_config(&sidecar)?;
        installed.normalize_without_path(svc.home.clone())?;
        runner::stop(&installed).await
    }

    async fn list(&self, svc: &Service) -> Result<ListResult, Error> {
        let home = Self::user_only(svc)?;
        let etc = Self::etc_dir(home);
        let mut result = ListResult::default();

        let registered = match self.registered_titles().await {
            Ok(titles) => titles,
            Err(e) => {
                result.errors.push(e.to_string());
                Vec::new()
            }
        };
        let mut claimed = vec![false; registered.len()];

        for file_name in unit_files(&etc, EXT) {
            let path = etc.join(&file_name);
            let installed = match load_config(&path) {
                Ok(installed) => installed,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            let title = if installed.title.is_empty() {
                &installed.name
            } else {
                &installed.title
            };
            match registered.iter().position(|r| r.eq_ignore_ascii_case(title)) {
                Some(i) => {
                    claimed[i] = true;
                    let stem = strip_unit_ext(&file_name, EXT).unwrap_or(&file_name);
                    result.managed.push(stem.to_string());
                }
                None => result.errors.push(format!(
                    "'{}' has a config at {} but no autostart entry",
                    title,
                    path.display()
                )),
            }
        }

        result.others = registered
            .into_iter()
            .zip(claimed)
            .filter(|(_, claimed)| !claimed)
            .map(|(name, _)| name)
            .collect();
        Ok(result)
    }
}
