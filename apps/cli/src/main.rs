//! shareget CLI - pull shared files from a nearby device
//!
//! Polls the configured share endpoints, downloads every file the first
//! responding endpoint lists, and shows progress while it runs.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// shareget - pull files shared over the local network
#[derive(Parser)]
#[command(name = "shareget")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config directory for shareget
    #[arg(long, env = "SHAREGET_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

const PULL_AFTER_HELP: &str = "\
The idle-abort deadline only covers finding a manifest. Once files are being
fetched there is no per-request timeout, so a transfer that stalls keeps the
run open until you press Ctrl-C.";

#[derive(Subcommand)]
enum Commands {
    /// Download every file the first responding endpoint is sharing
    #[command(after_help = PULL_AFTER_HELP)]
    Pull {
        /// Endpoint base URL to try (repeatable; replaces configured endpoints)
        #[arg(short, long = "endpoint")]
        endpoints: Vec<String>,

        /// Directory to save files into
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all settings
    Show,

    /// Print the settings file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "shareget_core=debug,shareget=debug"
        } else {
            "warn"
        })
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Determine config directory
    let config_dir = cli.config_dir.unwrap_or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("shareget"))
            .unwrap_or_else(|| PathBuf::from(".shareget"))
    });

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "shareget", &mut std::io::stdout());
        return Ok(());
    }

    // Initialize core
    let core = shareget_core::ShareCore::new(config_dir).await?;

    match cli.command {
        Commands::Pull { endpoints, dir } => {
            commands::pull(&core, endpoints, dir, cli.output).await?
        }

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}
