use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use navcast::core::log::init_logging;

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

impl From<Commands> for navcast::AppCommand {
    fn from(cmd: Commands) -> navcast::AppCommand {
        match cmd {
            Commands::Estimate => navcast::AppCommand::Estimate,
            Commands::Watch => navcast::AppCommand::Watch,
            Commands::Intraday { code } => navcast::AppCommand::Intraday { code },
            Commands::Backtest { force, dataset } => {
                navcast::AppCommand::Backtest { force, dataset }
            }
            Commands::Parse { file } => navcast::AppCommand::Parse { file },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Estimate every configured fund once
    Estimate,
    /// Keep estimating on the refresh interval and record intraday history
    Watch,
    /// Show the recorded intraday curve of a fund
    Intraday {
        /// Fund code, e.g. 161725
        code: String,
    },
    /// Score the current strategy against the baseline on past trading days
    Backtest {
        /// Ignore a cached report for today
        #[arg(short, long)]
        force: bool,
        /// Dataset file overriding backtest.dataset_path
        #[arg(short, long)]
        dataset: Option<String>,
    },
    /// Check a holdings text file, one `symbol weight` per line
    Parse {
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => navcast::cli::setup::setup(),
        Some(cmd) => navcast::run_command(cmd.into(), cli.config_path.as_deref()).await,
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
