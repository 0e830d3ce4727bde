use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fleetfix::settings::Settings;

mod cli;

#[derive(Parser)]
#[command(name = "fleetfix")]
#[command(about = "Detects and remediates compliance drift across FastAPI service repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Detect only; do not patch, commit or open pull requests")]
    dry_run: bool,

    #[arg(long, global = true, help = "Path to the fleet config file (default: fleet.yml)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, help = "Log output format")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Report compliance drift for a local repository as JSON")]
    Detect {
        #[arg(help = "Path to the repository")]
        repo: PathBuf,
    },

    #[command(about = "Patch a local repository inside the workspace")]
    Patch {
        #[arg(help = "Path to the repository (must be inside the workspace root)")]
        repo: PathBuf,

        #[arg(long, help = "Service name used in generated code (default: directory name)")]
        service: Option<String>,
    },

    #[command(about = "Clone, patch and open pull requests for a list of repositories")]
    Run {
        #[arg(help = "Repository URLs (default: `repos` from the config file)")]
        repos: Vec<String>,
    },

    #[command(about = "Search the policy knowledge base")]
    Evidence {
        #[arg(help = "Free-text query")]
        query: String,

        #[arg(short = 'k', long, default_value_t = 4, help = "Maximum number of results")]
        limit: usize,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
    };
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect { repo } => {
            cli::detect(repo, &config).await?;
        }
        Commands::Patch { repo, service } => {
            cli::patch(repo, service, &settings, &config).await?;
        }
        Commands::Run { repos } => {
            cli::run(repos, &settings, &config).await?;
        }
        Commands::Evidence { query, limit } => {
            cli::evidence(query, limit, &settings).await?;
        }
    }

    Ok(())
}
