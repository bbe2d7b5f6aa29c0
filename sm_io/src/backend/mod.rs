//! Native service backends.
//!
//! Each backend turns a [`Service`] into the platform's artifact (systemd
//! unit, launchd property list, registry run-key plus runner) and drives the
//! platform's control tool. All three compile everywhere since they only
//! write files and shell out; [`native`] picks the one for the build target.

pub mod launchd;
pub mod systemd;
pub mod windows;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sm_core::{Error, MatchedUnit, Scope, Service, resolve_unit, strip_unit_ext};

use crate::runnable::Runnable;
use crate::traits::{CommandRunner, SystemCommandRunner};

pub use launchd::LaunchdBackend;
pub use systemd::SystemdBackend;
pub use windows::WindowsBackend;

/// Units carrying this text near the top were written by us.
pub const MARKER: &str = "for serviceman.";
/// How far into a unit file the marker is looked for.
pub const MARKER_WINDOW: usize = 256;

/// Services found in one scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Installed by serviceman
    pub managed: Vec<String>,
    pub others: Vec<String>,
    /// Entries that could not be inspected
    pub errors: Vec<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// The native artifact for `svc`, byte-for-byte what `install` writes.
    fn render(&self, svc: &Service) -> Result<String, Error>;

    /// The control-tool commands `install` runs once the artifact is written.
    fn install_commands(&self, svc: &Service) -> Result<Vec<Runnable>, Error>;

    /// Write the native artifact and start the service.
    ///
    /// Returns the backend name. Nothing is written when the descriptor is
    /// refused.
    async fn install(&self, svc: &mut Service) -> Result<&'static str, Error>;

    async fn start(&self, svc: &Service) -> Result<(), Error>;

    async fn stop(&self, svc: &Service) -> Result<(), Error>;

    async fn list(&self, svc: &Service) -> Result<ListResult, Error>;
}

/// The backend for the platform this binary was built for.
#[cfg(target_os = "macos")]
pub fn native(privileged: bool) -> Box<dyn Backend> {
    Box::new(LaunchdBackend::new(system_runner(), privileged))
}

#[cfg(windows)]
pub fn native(privileged: bool) -> Box<dyn Backend> {
    Box::new(WindowsBackend::new(system_runner(), privileged))
}

#[cfg(not(any(target_os = "macos", windows)))]
pub fn native(privileged: bool) -> Box<dyn Backend> {
    Box::new(SystemdBackend::new(system_runner(), privileged))
}

fn system_runner() -> Arc<dyn CommandRunner> {
    Arc::new(SystemCommandRunner)
}

/// Privileged ports are only granted to system services.
pub fn check_port_policy(svc: &Service) -> Result<(), Error> {
    if svc.privileged_ports && !svc.system {
        return Err(Error::PolicyViolation {
            message: format!(
                "'{}' asks for privileged ports, which requires a system service\n  hint: add --system",
                svc.name
            ),
        });
    }
    Ok(())
}

pub(crate) fn require_home(svc: &Service) -> Result<&Path, Error> {
    svc.home
        .as_deref()
        .ok_or_else(|| Error::HomeDirUnavailable {
            message: format!("needed for user service '{}'", svc.name),
        })
}

pub(crate) fn write_unit(path: &Path, contents: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
    }
    fs::write(path, contents)
        .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))
}

pub(crate) fn ensure_logdir(svc: &Service) -> Result<(), Error> {
    fs::create_dir_all(&svc.logdir).map_err(|e| Error::LogDirUnavailable {
        path: svc.logdir.clone(),
        message: e.to_string(),
    })
}

/// File names in `dir` ending in `ext`. A missing directory is empty.
pub(crate) fn unit_files(dir: &Path, ext: &str) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "no units");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| strip_unit_ext(name, ext).is_some())
        .collect();
    names.sort();
    names
}

/// Resolve `name` against the unit directories of both scopes.
pub(crate) fn resolve_in(
    requested: Scope,
    name: &str,
    ext: &str,
    system_dir: &Path,
    user_dir: Option<&Path>,
) -> Result<(MatchedUnit, PathBuf), Error> {
    let system_units = unit_files(system_dir, ext);
    let user_units = user_dir.map(|d| unit_files(d, ext)).unwrap_or_default();

    let matched = resolve_unit(requested, name, ext, &system_units, &user_units)?;
    let dir = match matched.scope {
        Scope::System => system_dir,
        Scope::User => user_dir.unwrap_or(system_dir),
    };
    let path = dir.join(&matched.file_name);
    debug!(name, unit = %path.display(), "resolved unit");
    Ok((matched, path))
}

/// Split the units in `dir` into ours and everybody else's.
pub(crate) fn scan_units(dir: &Path, ext: &str) -> ListResult {
    let mut result = ListResult::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return result,
        Err(e) => {
            result
                .errors
                .push(format!("{}: {}", dir.display(), e));
            return result;
        }
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    for file_name in names {
        let Some(stem) = strip_unit_ext(&file_name, ext) else {
            continue;
        };
        let path = dir.join(&file_name);
        match has_marker(&path) {
            Ok(true) => result.managed.push(stem.to_string()),
            Ok(false) => result.others.push(stem.to_string()),
            Err(e) => result.errors.push(format!("{}: {}", path.display(), e)),
        }
    }
    result
}

fn has_marker(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(MARKER_WINDOW);
    File::open(path)?
        .take(MARKER_WINDOW as u64)
        .read_to_end(&mut head)?;
    Ok(String::from_utf8_lossy(&head).contains(MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("absent");
        assert!(unit_files(&dir, ".service").is_empty());
        assert_eq!(scan_units(&dir, ".service"), ListResult::default());
    }

    #[test]
    fn scan_partitions_by_marker() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("demo.service"),
            format!("# Generated {} Edit freely.\n[Unit]\n", MARKER),
        )
        .unwrap();
        fs::write(tmp.path().join("sshd.service"), "[Unit]\nDescription=ssh\n").unwrap();
        fs::write(tmp.path().join("notes.txt"), MARKER).unwrap();

        let result = scan_units(tmp.path(), ".service");
        assert_eq!(result.managed, vec!["demo"]);
        assert_eq!(result.others, vec!["sshd"]);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn marker_past_the_window_does_not_count() {
        let tmp = TempDir::new().unwrap();
        let padding = "#".repeat(MARKER_WINDOW);
        fs::write(
            tmp.path().join("late.service"),
            format!("{}\n{}", padding, MARKER),
        )
        .unwrap();

        let result = scan_units(tmp.path(), ".service");
        assert_eq!(result.others, vec!["late"]);
    }

    #[test]
    fn resolve_reads_both_directories() {
        let tmp = TempDir::new().unwrap();
        let system = tmp.path().join("system");
        let user = tmp.path().join("user");
        fs::create_dir_all(&system).unwrap();
        fs::create_dir_all(&user).unwrap();
        fs::write(system.join("foo-bar.service"), "").unwrap();
        fs::write(system.join("foo-baz.service"), "").unwrap();
        fs::write(user.join("foo.service"), "").unwrap();

        let (matched, path) =
            resolve_in(Scope::System, "foo", ".service", &system, Some(&user)).unwrap();
        assert_eq!(matched.scope, Scope::User);
        assert_eq!(path, user.join("foo.service"));
    }

    #[test]
    fn privileged_ports_need_system_scope() {
        let svc = Service {
            name: "web".to_string(),
            privileged_ports: true,
            ..Default::default()
        };
        assert!(matches!(
            check_port_policy(&svc),
            Err(Error::PolicyViolation { .. })
        ));

        let svc = Service {
            system: true,
            ..svc
        };
        assert!(check_port_policy(&svc).is_ok());
    }
}
