//! Trait abstractions for shelling out, so backends can be tested without
//! running `systemctl`, `launchctl` or `reg.exe`.

use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use sm_core::Error;

/// What a finished command left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// stdout followed by stderr
    pub combined: String,
}

impl CommandOutput {
    pub fn ok(combined: impl Into<String>) -> Self {
        Self {
            success: true,
            combined: combined.into(),
        }
    }

    pub fn failed(combined: impl Into<String>) -> Self {
        Self {
            success: false,
            combined: combined.into(),
        }
    }
}

/// Runs one external program to completion.
///
/// Implementations only report what happened; deciding whether that counts
/// as success is up to [`crate::runnable::Runnable`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error>;
}

/// Real runner on top of `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        debug!(program, ?args, "spawning");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                output: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_captures_both_streams() {
        let out = SystemCommandRunner
            .run(
                "sh",
                &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            )
            .await
            .unwrap();

        assert!(!out.success);
        assert!(out.combined.contains("out"));
        assert!(out.combined.contains("err"));
    }

    #[tokio::test]
    async fn missing_program_is_a_command_failure() {
        let err = SystemCommandRunner
            .run("serviceman-definitely-not-a-real-program", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn mock_runner_sees_arguments() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|program, args| program == "systemctl" && args == ["--user", "daemon-reload"])
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        let out = mock
            .run(
                "systemctl",
                &["--user".to_string(), "daemon-reload".to_string()],
            )
            .await
            .unwrap();
        assert!(out.success);
    }
}
