//! serviceman - Cross-platform service management for Linux, macOS and Windows.

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod exit;

use commands::ScopeArgs;
use commands::add::AddArgs;
use commands::run::RunArgs;
use exit::{Exit, USAGE};

#[derive(Parser)]
#[command(name = "serviceman")]
#[command(about = "Turn any program into a service that starts on boot or login")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a program as a service and start it
    #[command(alias = "install")]
    Add(AddArgs),

    /// Supervise a service described by a config file
    Run(RunArgs),

    /// Start an installed service
    Start {
        /// Service name
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Stop a running service
    Stop {
        /// Service name
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Stop a service, then start it again
    Restart {
        /// Service name
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List installed services
    List {
        /// Also show services not installed by serviceman
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Print the version
    Version,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SERVICEMAN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(USAGE);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(e.code);
    }
}

async fn run(cli: Cli) -> Result<(), Exit> {
    match cli.command {
        Commands::Add(args) => commands::add::run(args).await,
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Start { name, scope } => commands::control::start(&name, &scope).await,
        Commands::Stop { name, scope } => commands::control::stop(&name, &scope).await,
        Commands::Restart { name, scope } => commands::control::restart(&name, &scope).await,
        Commands::List { all, scope } => commands::list::run(all, &scope).await,
        Commands::Version => {
            println!("serviceman {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
