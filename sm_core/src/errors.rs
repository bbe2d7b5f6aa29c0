use std::fmt;
use std::path::PathBuf;

use crate::matcher::Scope;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    PolicyViolation {
        message: String,
    },
    ServiceNotFound {
        name: String,
        scope: Scope,
        other_scope: Vec<String>,
    },
    AmbiguousService {
        name: String,
        candidates: Vec<String>,
    },
    CommandFailed {
        command: String,
        output: String,
    },
    HomeDirUnavailable {
        message: String,
    },
    LogDirUnavailable {
        path: PathBuf,
        message: String,
    },
    ExecutableNotFound {
        exec: String,
        reason: String,
    },
    AlreadyRunning {
        name: String,
        pid: u32,
        exe: String,
    },
    NoPidFile {
        path: PathBuf,
    },
    InvalidPidFile {
        path: PathBuf,
    },
    ProcessNotFound {
        pid: u32,
    },
    ProcessWontDie {
        pid: u32,
        exe: String,
    },
    Config {
        path: PathBuf,
        message: String,
    },
    Io {
        message: String,
    },
    Unsupported {
        message: String,
    },
}

impl Error {
    /// Environment errors leave no sane place to put logs or units, so the
    /// CLI terminates on them with a dedicated exit code.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Error::HomeDirUnavailable { .. } | Error::LogDirUnavailable { .. }
        )
    }

    pub fn io(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        Error::Io {
            message: format!("{}: {}", context, err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PolicyViolation { message } => {
                write!(f, "refusing to continue: {}", message)
            }
            Error::ServiceNotFound {
                name,
                scope,
                other_scope,
            } => {
                write!(f, "didn't find {} service matching '{}'", scope, name)?;
                if !other_scope.is_empty() {
                    write!(
                        f,
                        "\n  hint: did you intend to use a {} service instead?\n\t{}",
                        scope.opposite(),
                        other_scope.join("\n\t")
                    )?;
                }
                Ok(())
            }
            Error::AmbiguousService { name, candidates } => {
                write!(
                    f,
                    "found more than one service matching '{}':\n\t{}",
                    name,
                    candidates.join("\n\t")
                )?;
                write!(f, "\n  hint: use the full unit name to pick one")
            }
            Error::CommandFailed { command, output } => {
                write!(f, "failed to run {}", command)?;
                let output = output.trim();
                if !output.is_empty() {
                    write!(f, "\n{}", output)?;
                }
                Ok(())
            }
            Error::HomeDirUnavailable { message } => {
                write!(
                    f,
                    "unrecoverable error: could not determine home directory: {}\n  hint: set $HOME or use --system",
                    message
                )
            }
            Error::LogDirUnavailable { path, message } => {
                write!(
                    f,
                    "unrecoverable error: could not create log directory '{}': {}",
                    path.display(),
                    message
                )
            }
            Error::ExecutableNotFound { exec, reason } => {
                write!(f, "'{}' could not be found: {}", exec, reason)?;
                write!(f, "\n  hint: use --force to install it anyway")
            }
            Error::AlreadyRunning { name, pid, exe } => {
                write!(
                    f,
                    "'{}' may already be running as '{}' (pid {})\n  hint: run 'serviceman stop {}' first",
                    name, exe, pid, name
                )
            }
            Error::NoPidFile { path } => {
                write!(f, "no pid file at '{}'", path.display())
            }
            Error::InvalidPidFile { path } => {
                write!(f, "malformed pid file at '{}'", path.display())
            }
            Error::ProcessNotFound { pid } => {
                write!(f, "process not found by pid {}", pid)
            }
            Error::ProcessWontDie { pid, exe } => {
                write!(f, "process '{}' ({}) just won't die", exe, pid)
            }
            Error::Config { path, message } => {
                write!(
                    f,
                    "couldn't load config file '{}': {}",
                    path.display(),
                    message
                )
            }
            Error::Io { message } => write!(f, "{}", message),
            Error::Unsupported { message } => write!(f, "unsupported: {}", message),
        }
    }
}

impl std::error::Error for Error {}
