//! rustact CLI: the main entry point.
//!
//! Commands:
//! - `agent`: Run a single task or an interactive session
//! - `tools`: List the built-in tools
//! - `init`: Write the default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "rustact",
    about = "rustact: a ReAct coding agent for your terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Give the agent a task
    Agent {
        /// Run a single task instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the maximum number of model turns per task
        #[arg(long)]
        max_steps: Option<usize>,

        /// Write the task transcript as JSON to this path
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// List the built-in tools and their parameters
    Tools,

    /// Create the default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so answers on stdout stay clean.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Agent {
            message,
            max_steps,
            transcript,
        } => {
            commands::agent::run(commands::agent::AgentArgs {
                message,
                max_steps,
                transcript,
            })
            .await?
        }
        Commands::Tools => commands::tools::run()?,
        Commands::Init => commands::init::run()?,
    }

    Ok(())
}
