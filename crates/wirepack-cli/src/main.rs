#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;
mod notifier;

use clap::Parser;
use commands::build::BuildAction;
use commands::dev::DevAction;
use commands::Project;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wirepack")]
#[command(author, version, about = "Resolve, transform and serve a web application's sources", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Explicit config file (overrides auto-discovery)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress console output except desktop notifications
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build once and write assets to the output directory
    Build,

    /// Start the development server with live updates
    Dev {
        /// Host to bind to (overrides HOST and the config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides PORT and the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Version => commands::version::run(cli.json),
        Commands::Build => {
            logging::init(cli.verbose, cli.json, cli.quiet);
            let project = Project::load(&cwd, cli.config.as_deref())?;
            let ok = commands::build::run(BuildAction {
                project,
                json: cli.json,
                quiet: cli.quiet,
            })?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Dev { host, port } => {
            let project = Project::load(&cwd, cli.config.as_deref())?;
            let quiet = cli.quiet || project.config.dev_server.quiet;
            logging::init(cli.verbose, cli.json, quiet);
            let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
            runtime.block_on(commands::dev::run(DevAction {
                project,
                host,
                port,
                quiet,
            }))
        }
    }
}
