//! One native tool invocation plus the rules for judging its output.

use std::fmt;

use tracing::{debug, warn};

use sm_core::Error;

use crate::traits::CommandRunner;

/// A shell-out that a backend issues while installing or controlling a
/// service.
///
/// Native tools are inconsistent about exit codes, so success is decided by
/// the exit status together with the combined output: every keyword must
/// appear, no badword may appear. Output containing a tolerated word counts
/// as success regardless, so "already stopped" need not be an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Runnable {
    pub program: String,
    pub args: Vec<String>,
    pub must: bool,
    pub keywords: Vec<String>,
    pub badwords: Vec<String>,
    pub tolerated: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Runnable {
    pub fn must<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            must: true,
            keywords: Vec::new(),
            badwords: Vec::new(),
            tolerated: Vec::new(),
        }
    }

    pub fn best_effort<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            must: false,
            ..Self::must(program, args)
        }
    }

    pub fn keywords(mut self, words: &[&str]) -> Self {
        self.keywords = owned(words);
        self
    }

    pub fn badwords(mut self, words: &[&str]) -> Self {
        self.badwords = owned(words);
        self
    }

    pub fn tolerate(mut self, words: &[&str]) -> Self {
        self.tolerated = owned(words);
        self
    }

    /// `program args...` without the trailing `|| exit` decoration.
    pub fn command_line(&self) -> String {
        let mut line = quote(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }

    /// Whether a finished invocation satisfied this command.
    pub fn judge(&self, success: bool, combined: &str) -> bool {
        if self.tolerated.iter().any(|w| combined.contains(w.as_str())) {
            return true;
        }
        success
            && !self.badwords.iter().any(|w| combined.contains(w.as_str()))
            && self.keywords.iter().all(|w| combined.contains(w.as_str()))
    }

    /// Run the command. Best-effort commands never fail.
    pub async fn run(&self, runner: &dyn CommandRunner) -> Result<(), Error> {
        let line = self.command_line();
        debug!(command = %line, must = self.must, "running");

        let output = match runner.run(&self.program, &self.args).await {
            Ok(output) => output,
            Err(err) if !self.must => {
                warn!(command = %line, error = %err, "ignoring failure");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if self.judge(output.success, &output.combined) {
            return Ok(());
        }
        if !self.must {
            warn!(command = %line, output = %output.combined.trim(), "ignoring failure");
            return Ok(());
        }
        Err(Error::CommandFailed {
            command: line,
            output: output.combined,
        })
    }
}

impl fmt::Display for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.must {
            return write!(f, "{} || true", self.command_line());
        }
        write!(f, "{} || exit", self.command_line())?;
        for word in &self.keywords {
            write!(f, "\n# output must contain '{}'", word)?;
        }
        for word in &self.badwords {
            write!(f, "\n# output must not contain '{}'", word)?;
        }
        for word in &self.tolerated {
            write!(f, "\n# fine if output contains '{}'", word)?;
        }
        Ok(())
    }
}

/// Run commands in order, stopping at the first failing must-succeed one.
pub async fn run_all(cmds: &[Runnable], runner: &dyn CommandRunner) -> Result<(), Error> {
    for cmd in cmds {
        cmd.run(runner).await?;
    }
    Ok(())
}

/// Render a command sequence as a shell script, one command per line.
pub fn render_all(cmds: &[Runnable]) -> String {
    cmds.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,\\".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{CommandOutput, MockCommandRunner};

    fn starter() -> Runnable {
        Runnable::must("systemctl", ["start", "demo.service"]).badwords(&["not found", "failed"])
    }

    #[test]
    fn display_marks_must_and_best_effort() {
        assert_eq!(
            starter().to_string(),
            "systemctl start demo.service || exit\n\
             # output must not contain 'not found'\n\
             # output must not contain 'failed'"
        );
        assert_eq!(
            Runnable::best_effort("systemctl", ["daemon-reload"]).to_string(),
            "systemctl daemon-reload || true"
        );
    }

    #[test]
    fn arguments_with_spaces_are_quoted() {
        let cmd = Runnable::must("reg", ["add", "HKCU\\Run", "/d", "\"C:\\a b\\x.exe\" run"]);
        assert_eq!(
            cmd.command_line(),
            "reg add HKCU\\Run /d '\"C:\\a b\\x.exe\" run'"
        );
    }

    #[test]
    fn badwords_beat_a_clean_exit() {
        assert!(!starter().judge(true, "Job for demo.service failed."));
        assert!(starter().judge(true, ""));
    }

    #[test]
    fn keywords_are_all_required() {
        let cmd = Runnable::must("tool", ["x"]).keywords(&["alpha", "beta"]);
        assert!(cmd.judge(true, "alpha and beta"));
        assert!(!cmd.judge(true, "alpha only"));
    }

    #[test]
    fn failed_exit_is_never_success() {
        assert!(!starter().judge(false, ""));
    }

    #[test]
    fn tolerated_output_wins_over_exit_status_and_badwords() {
        let stopper = Runnable::must("systemctl", ["stop", "demo.service"])
            .tolerate(&["not loaded"])
            .badwords(&["Failed to stop"]);
        assert!(stopper.judge(
            false,
            "Failed to stop demo.service: Unit demo.service not loaded."
        ));
        assert!(!stopper.judge(false, "Failed to stop demo.service: Access denied"));
        assert!(stopper.judge(true, ""));
        assert!(
            stopper
                .to_string()
                .ends_with("# fine if output contains 'not loaded'")
        );
    }

    #[tokio::test]
    async fn must_failure_carries_tool_output() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .returning(|_, _| Ok(CommandOutput::failed("Unit demo.service not found.")));

        let err = starter().run(&mock).await.unwrap_err();
        assert_eq!(
            err,
            Error::CommandFailed {
                command: "systemctl start demo.service".to_string(),
                output: "Unit demo.service not found.".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().times(1).returning(|_, _| {
            Err(Error::CommandFailed {
                command: "systemctl".to_string(),
                output: "No such file".to_string(),
            })
        });

        Runnable::best_effort("systemctl", ["stop", "demo.service"])
            .run(&mock)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sequence_stops_at_first_must_failure() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|_, args| args.first().map(String::as_str) == Some("daemon-reload"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed("")));
        mock.expect_run()
            .withf(|_, args| args.first().map(String::as_str) == Some("start"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::failed("failed")));

        let cmds = vec![
            Runnable::best_effort("systemctl", ["daemon-reload"]),
            starter(),
            Runnable::must("systemctl", ["never"]),
        ];
        let err = run_all(&cmds, &mock).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[test]
    fn render_all_joins_lines() {
        let cmds = vec![
            Runnable::best_effort("launchctl", ["unload", "-w", "/x.plist"]),
            Runnable::must("launchctl", ["load", "-w", "/x.plist"]),
        ];
        assert_eq!(
            render_all(&cmds),
            "launchctl unload -w /x.plist || true\nlaunchctl load -w /x.plist || exit"
        );
    }
}
