//! Platform-neutral description of a service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Error;
use crate::matcher::Scope;

/// Everything needed to run a service on Linux, macOS or Windows.
///
/// Callers fill in what they know; [`Service::normalize_without_path`] or
/// [`Service::normalize`] fill in the rest. `home`, `local` and `logdir` are
/// derived and should not be set by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Service {
    /// Human-friendly name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Computer-friendly name, unique within a scope
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Namespaced identity used for launchd labels, e.g. `com.example.foo`
    #[serde(default)]
    pub reverse_dns: String,
    /// Interpreter (node, python, ...) that receives `exec` as its first argument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub exec: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    /// Run-as user (system scope only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip)]
    pub home: Option<PathBuf>,
    #[serde(skip)]
    pub local: Option<PathBuf>,
    #[serde(default)]
    pub logdir: PathBuf,
    #[serde(default)]
    pub system: bool,
    #[serde(default = "default_restart")]
    pub restart: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub production: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged_ports: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multiuser_protection: bool,
}

fn default_restart() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn blank_to_none(value: &mut Option<String>) {
    if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
        *value = None;
    }
}

fn is_readable_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| !m.is_dir()).unwrap_or(false) && fs::File::open(path).is_ok()
}

impl Service {
    pub fn scope(&self) -> Scope {
        Scope::from_system(self.system)
    }

    /// Fill in defaults and derived paths without touching the filesystem.
    ///
    /// `home` is required for user-scope services; system-scope services use
    /// it only to look at user units during name resolution.
    pub fn normalize_without_path(&mut self, home: Option<PathBuf>) -> Result<(), Error> {
        blank_to_none(&mut self.interpreter);
        blank_to_none(&mut self.user);
        blank_to_none(&mut self.group);
        blank_to_none(&mut self.desc);
        blank_to_none(&mut self.url);

        if self.name.is_empty() {
            self.name = Path::new(&self.exec)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_lowercase())
                .unwrap_or_default();
        }
        if self.title.is_empty() {
            self.title = self.name.clone();
        }
        if self.reverse_dns.is_empty() {
            self.reverse_dns = self.name.clone();
        }

        let home = home.or_else(|| self.home.clone());
        if let Some(home) = &home {
            self.local = Some(home.join(".local"));
        }
        self.home = home;

        if self.system {
            if self.user.is_none() {
                self.user = Some("root".to_string());
            }
            if self.group.is_none() {
                self.group = self.user.clone();
            }
            self.logdir = PathBuf::from("/var/log").join(&self.name);
        } else {
            let home = self.home.as_ref().ok_or_else(|| Error::HomeDirUnavailable {
                message: format!("needed for user service '{}'", self.name),
            })?;
            self.logdir = home
                .join(".local")
                .join("share")
                .join(&self.name)
                .join("var")
                .join("log");
        }

        Ok(())
    }

    /// Normalize and make sure `exec` points at a readable file.
    ///
    /// A bare `exec` that does not exist is also looked for in
    /// `<local>/opt/<name>/<exec>`. With `force`, a missing executable is
    /// made absolute and accepted anyway.
    pub fn normalize(&mut self, home: Option<PathBuf>, force: bool) -> Result<(), Error> {
        self.normalize_without_path(home)?;

        let exec = PathBuf::from(&self.exec);
        if is_readable_file(&exec) {
            self.exec = absolute(&exec)?;
            return Ok(());
        }

        let bare = !self.exec.contains('/') && !self.exec.contains('\\');
        if bare && let Some(local) = &self.local {
            let opt_path = local.join("opt").join(&self.name).join(&self.exec);
            if is_readable_file(&opt_path) {
                self.exec = opt_path.to_string_lossy().into_owned();
                return Ok(());
            }
        }

        if !force {
            return Err(Error::ExecutableNotFound {
                exec: self.exec.clone(),
                reason: "not a readable file".to_string(),
            });
        }
        self.exec = absolute(&exec)?;
        Ok(())
    }

    /// The program to spawn and its arguments.
    pub fn command_line(&self) -> (String, Vec<String>) {
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = Vec::with_capacity(self.argv.len() + 1);
                args.push(self.exec.clone());
                args.extend(self.argv.iter().cloned());
                (interpreter.clone(), args)
            }
            None => (self.exec.clone(), self.argv.clone()),
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.logdir.join(format!("{}.pid", self.name))
    }

    pub fn log_file(&self) -> PathBuf {
        self.logdir.join(format!("{}.log", self.name))
    }
}

fn absolute(path: &Path) -> Result<String, Error> {
    std::path::absolute(path)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| Error::io(format!("failed to resolve {}", path.display()), e))
}
