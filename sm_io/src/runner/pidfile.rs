//! The liveness record: `<logdir>/<name>.pid`, holding the decimal pid of the
//! supervising runner with no trailing newline.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::debug;

use sm_core::Error;

pub const READ_ATTEMPTS: u32 = 3;
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(400);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PidFileState {
    Missing,
    /// Unreadable, empty or not a number. Usually a write in progress.
    Invalid,
    Pid(u32),
}

pub fn read_pid_file(path: &Path) -> PidFileState {
    match fs::read_to_string(path) {
        Ok(text) => match text.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => PidFileState::Pid(pid),
            _ => PidFileState::Invalid,
        },
        Err(e) if e.kind() == ErrorKind::NotFound => PidFileState::Missing,
        Err(_) => PidFileState::Invalid,
    }
}

/// Replace the record in one step so readers never see a partial write.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(format!("failed to create temp file in {}", dir.display()), e))?;
    tmp.write_all(pid.to_string().as_bytes())
        .map_err(|e| Error::io("failed to write pid", e))?;
    tmp.persist(path)
        .map_err(|e| Error::io(format!("failed to write {}", path.display()), e.error))?;
    Ok(())
}

/// Remove the record, but only while it still names `pid`.
pub fn remove_pid_file_if_owned(path: &Path, pid: u32) {
    if read_pid_file(path) == PidFileState::Pid(pid)
        && let Err(e) = fs::remove_file(path)
    {
        debug!(path = %path.display(), error = %e, "could not remove pid file");
    }
}

/// Read the record, retrying a malformed one a few times before giving up.
pub async fn read_pid_with_retry(
    path: &Path,
    attempts: u32,
    delay: Duration,
) -> Result<u32, Error> {
    for attempt in 1..=attempts.max(1) {
        match read_pid_file(path) {
            PidFileState::Pid(pid) => return Ok(pid),
            PidFileState::Missing => {
                return Err(Error::NoPidFile {
                    path: path.to_path_buf(),
                });
            }
            PidFileState::Invalid => {
                debug!(path = %path.display(), attempt, "malformed pid file");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(Error::InvalidPidFile {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_has_no_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.pid");

        write_pid_file(&path, 4242).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "4242");
        assert_eq!(read_pid_file(&path), PidFileState::Pid(4242));
    }

    #[test]
    fn states_for_missing_and_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.pid");
        assert_eq!(read_pid_file(&path), PidFileState::Missing);

        fs::write(&path, "").unwrap();
        assert_eq!(read_pid_file(&path), PidFileState::Invalid);

        fs::write(&path, "12ab").unwrap();
        assert_eq!(read_pid_file(&path), PidFileState::Invalid);
    }

    #[test]
    fn only_the_owner_removes_the_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.pid");
        write_pid_file(&path, 10).unwrap();

        remove_pid_file_if_owned(&path, 11);
        assert!(path.exists());

        remove_pid_file_if_owned(&path, 10);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn retry_gives_up_on_persistent_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.pid");
        fs::write(&path, "not a pid").unwrap();

        let err = read_pid_with_retry(&path, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidPidFile { path });
    }

    #[tokio::test]
    async fn retry_reports_missing_record_immediately() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.pid");

        let err = read_pid_with_retry(&path, 3, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPidFile { .. }));
    }
}
