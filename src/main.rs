use anyhow::Result;
use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use procure::cli::cache::PruneRule;
use procure::core::log::init_logging;
use procure::core::shopping::RecommendationMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Build a shopping plan for the materials of a plan file
    Plan {
        /// Plan file (YAML)
        file: PathBuf,
        /// minimize-total-cost, maximize-value or best-unit-price
        #[arg(short, long)]
        mode: Option<RecommendationMode>,
        /// Search every data center of the configured region
        #[arg(short, long)]
        region: bool,
        /// Print the chosen strategy as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare crafting against buying for every crafted item
    Craft {
        /// Plan file (YAML)
        file: PathBuf,
    },
    /// Inspect or prune the market data cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache statistics
    Stats,
    /// Remove cached entries
    #[command(group(ArgGroup::new("rule").required(true).args(["older_than_hours", "oldest"])))]
    Prune {
        /// Remove entries fetched more than this many hours ago
        #[arg(long)]
        older_than_hours: Option<i64>,
        /// Remove this many of the oldest entries
        #[arg(long)]
        oldest: Option<usize>,
    },
}

impl From<Commands> for procure::AppCommand {
    fn from(cmd: Commands) -> procure::AppCommand {
        match cmd {
            Commands::Plan {
                file,
                mode,
                region,
                json,
            } => procure::AppCommand::Plan {
                file,
                mode,
                region,
                json,
            },
            Commands::Craft { file } => procure::AppCommand::Craft { file },
            Commands::Cache(CacheCommands::Stats) => procure::AppCommand::CacheStats,
            Commands::Cache(CacheCommands::Prune {
                older_than_hours,
                oldest,
            }) => procure::AppCommand::CachePrune(match (older_than_hours, oldest) {
                (Some(hours), _) => PruneRule::OlderThanHours(hours),
                (None, Some(count)) => PruneRule::Oldest(count),
                (None, None) => unreachable!("clap requires one prune rule"),
            }),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => procure::cli::setup::setup(),
        Some(cmd) => procure::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
