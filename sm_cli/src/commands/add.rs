//! `serviceman add`: describe a program as a service and install it.

use std::path::PathBuf;

use clap::Args;
use console::style;

use sm_core::Service;
use sm_io::{
    absolutize_path_args, home_dir, is_privileged, native, render_all, resolve_command,
};

use super::ScopeArgs;
use crate::display::{format_command, header, success, warning};
use crate::exit::{
    BAD_PATH_ARG, EXEC_NOT_FOUND, Exit, INSTALL, MISSING_EXEC, NORMALIZE, OrExit, RENDER, USAGE,
};

#[derive(Args, Clone, Debug, Default)]
pub struct AddArgs {
    /// Human-friendly name for the service
    #[arg(long)]
    pub title: Option<String>,

    /// Computer-friendly name for the service (ex: foo-app)
    #[arg(long)]
    pub name: Option<String>,

    /// Human-friendly description of the service (ex: Foo App)
    #[arg(long)]
    pub desc: Option<String>,

    /// Documentation or home page of the service
    #[arg(long)]
    pub url: Option<String>,

    /// Reverse-DNS label for launchd (ex: com.example.foo-app)
    #[arg(long)]
    pub rdns: Option<String>,

    /// Directory to start the service in (default: current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Run the service as this user (system services only)
    #[arg(long)]
    pub username: Option<String>,

    /// Run the service as this group (system services only)
    #[arg(long)]
    pub groupname: Option<String>,

    /// PATH for the service's environment
    #[arg(long)]
    pub path: Option<String>,

    /// Allow binding to privileged ports (system services only)
    #[arg(long)]
    pub cap_net_bind: bool,

    /// Install even if the executable or its interpreter can't be found
    #[arg(long)]
    pub force: bool,

    /// Print the service file instead of installing it
    #[arg(long)]
    pub dryrun: bool,

    /// Don't restart the service when it exits
    #[arg(long)]
    pub no_restart: bool,

    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Program to run, its arguments, then `--` and arguments passed through untouched
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Split at the first `--`: everything after it is passed through as-is,
/// including further separators.
pub(crate) fn split_raw_args(args: &[String]) -> (&[String], &[String]) {
    match args.iter().position(|a| a == "--") {
        Some(i) => (&args[..i], &args[i + 1..]),
        None => (args, &[]),
    }
}

pub async fn run(args: AddArgs) -> Result<(), Exit> {
    let (checked, raw) = split_raw_args(&args.command);
    let Some((program, program_args)) = checked.split_first() else {
        return Err(Exit::new(
            MISSING_EXEC,
            "nothing to run\n  hint: serviceman add ./foo-app --foo-arg",
        ));
    };

    let privileged = is_privileged();
    let (system, assumed_scope) = args.scope.resolve(privileged);
    if system && cfg!(windows) {
        return Err(Exit::new(
            USAGE,
            "system services are not supported on Windows\n  hint: use --user",
        ));
    }

    let mut assumptions = Vec::new();
    if let Some(flag) = assumed_scope {
        let why = if privileged {
            "# Because you're a privileged user"
        } else {
            "# Because you're an unprivileged user"
        };
        assumptions.push(format!("{}\n  {}", why, flag));
    }
    let workdir = match args.workdir.clone() {
        Some(dir) => std::path::absolute(&dir).unwrap_or(dir),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| Exit::new(NORMALIZE, format!("no working directory: {}", e)))?;
            assumptions.push(format!(
                "# Because this is your current working directory\n  --workdir {}",
                cwd.display()
            ));
            cwd
        }
    };

    let resolved = resolve_command(program, program_args, args.force).or_exit(EXEC_NOT_FOUND)?;
    for warn in &resolved.warnings {
        warning(warn);
    }
    let mut argv = absolutize_path_args(&resolved.argv, args.force).or_exit(BAD_PATH_ARG)?;
    argv.extend(raw.iter().cloned());

    let mut svc = Service {
        title: args.title.unwrap_or_default(),
        name: args.name.unwrap_or(resolved.name_hint),
        desc: args.desc,
        url: args.url,
        reverse_dns: args.rdns.unwrap_or_default(),
        interpreter: resolved.interpreter,
        exec: resolved.exec,
        argv,
        workdir: Some(workdir),
        user: args.username,
        group: args.groupname,
        system,
        restart: !args.no_restart,
        privileged_ports: args.cap_net_bind,
        ..Default::default()
    };
    if let Some(path) = args.path {
        svc.envs.insert("PATH".to_string(), path);
    }
    svc.normalize(home_dir(), args.force).or_exit(NORMALIZE)?;

    if system && !privileged {
        warning(&format!(
            "you may need to use 'sudo' to add '{}' as a system service",
            svc.name
        ));
    }
    if !assumptions.is_empty() {
        header("Making some assumptions...");
        for line in &assumptions {
            println!("\n{}", line);
        }
        println!();
    }

    let (program, program_args) = svc.command_line();
    header(&format!(
        "Service '{}' will be run like this (more or less):",
        svc.title
    ));
    match (&svc.user, system) {
        (Some(user), true) => println!("\n\t# Starts on system boot, as '{}'", user),
        _ => println!("\n\t# Starts when you log in"),
    }
    println!("{}", format_command(&program, &program_args));

    let backend = native(privileged);
    if args.dryrun {
        println!("{}", backend.render(&svc).or_exit(RENDER)?);
        let commands = backend.install_commands(&svc).or_exit(RENDER)?;
        header("Then run:");
        println!("{}", render_all(&commands));
        return Ok(());
    }

    let kind = backend.install(&mut svc).await.or_exit(INSTALL)?;

    success(&format!(
        "'{}' started as a {} {} service",
        svc.name,
        kind,
        if system { "system" } else { "user" }
    ));
    println!(
        "    {} {}",
        style("logs:").dim(),
        svc.log_file().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn raw_args_follow_the_first_separator() {
        let args = strings(&["./app", "--port", "80", "--", "--raw", "--", "--more"]);
        let (checked, raw) = split_raw_args(&args);
        assert_eq!(checked, strings(&["./app", "--port", "80"]).as_slice());
        assert_eq!(raw, strings(&["--raw", "--", "--more"]).as_slice());
    }

    #[test]
    fn no_separator_means_no_raw_args() {
        let args = strings(&["node", "server.js"]);
        let (checked, raw) = split_raw_args(&args);
        assert_eq!(checked.len(), 2);
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn empty_command_is_missing_exec() {
        let err = run(AddArgs::default()).await.unwrap_err();
        assert_eq!(err.code, MISSING_EXEC);
    }
}
