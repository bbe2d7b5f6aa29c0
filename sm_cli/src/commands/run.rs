//! `serviceman run`: supervise a service from its config file.

use std::path::PathBuf;

use clap::Args;

use sm_io::{home_dir, load_config, runner};

use crate::exit::{BAD_CONFIG, Exit, NORMALIZE, OrExit, START};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the service's JSON config
    #[arg(long)]
    pub config: PathBuf,

    /// Detach from the terminal and supervise in the background
    #[arg(long)]
    pub daemon: bool,
}

pub async fn run(args: RunArgs) -> Result<(), Exit> {
    // Validate before detaching so a bad file fails where someone can see it.
    let mut svc = load_config(&args.config).or_exit(BAD_CONFIG)?;

    if args.daemon {
        let config = std::path::absolute(&args.config).unwrap_or(args.config);
        runner::daemonize(&config).or_exit(START)?;
        return Ok(());
    }

    svc.normalize(home_dir(), false).or_exit(NORMALIZE)?;
    runner::start(&svc).await.or_exit(START)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_config_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let args = RunArgs {
            config: tmp.path().join("absent.json"),
            daemon: false,
        };
        assert_eq!(run(args).await.unwrap_err().code, BAD_CONFIG);
    }

    #[tokio::test]
    async fn config_without_exec_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("demo.json");
        std::fs::write(&path, r#"{"name": "demo"}"#).unwrap();
        let args = RunArgs {
            config: path,
            daemon: true,
        };
        let err = run(args).await.unwrap_err();
        assert_eq!(err.code, BAD_CONFIG);
        assert!(err.message.contains("exec"));
    }
}
