//! dlbridge CLI - fetch a file through the dlbridge engine
//!
//! Runs a single transfer with a live progress bar. Useful for trying out
//! download client settings before handing them to the server.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// dlbridge - chunked, throttled HTTP downloads
#[derive(Parser)]
#[command(name = "dlbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL
    Fetch(FetchArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct FetchArgs {
    /// URL to download
    url: String,

    /// Output file or directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of byte ranges to split the file into
    #[arg(short, long, default_value_t = 4)]
    chunks: i64,

    /// Parallel connections
    #[arg(long, default_value_t = 4)]
    connections: i64,

    /// Speed cap in MiB/s, 0 for unlimited
    #[arg(long, default_value_t = 0)]
    max_speed: i64,

    /// Timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout: i64,

    /// Outbound proxy
    #[arg(long, env = "DLBRIDGE_PROXY")]
    proxy: Option<String>,

    /// Use a single connection (supports pausing, never splits)
    #[arg(long)]
    simple: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    match cli.command {
        Commands::Fetch(args) => commands::fetch(args, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dlbridge", &mut std::io::stdout());
        }
    }

    Ok(())
}
