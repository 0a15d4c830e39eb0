//! Meridian CLI
//!
//! Main entry point for the meridian command-line tool.
//! Builds partitioned retrieval indexes over a support corpus, routes
//! questions, and reports knowledge gaps.

mod commands;
mod session;

use clap::{Parser, Subcommand};
use commands::{
    ApproveCommand, BuildCommand, ClassifyCommand, EmergingCommand, EvaluateCommand, GapsCommand,
    QueryCommand, StatsCommand,
};
use meridian_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// Meridian - partitioned retrieval and knowledge-gap detection for support corpora
#[derive(Parser, Debug)]
#[command(name = "meridian")]
#[command(about = "Partitioned retrieval and knowledge-gap detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "MERIDIAN_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "MERIDIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the JSON document corpus
    #[arg(short, long, global = true, env = "MERIDIAN_DOCUMENTS")]
    documents: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build or refresh the partition indexes
    Build(BuildCommand),

    /// Retrieve similar documents
    Query(QueryCommand),

    /// Route a question to a partition and retrieve
    Classify(ClassifyCommand),

    /// Detect knowledge gaps in ticket resolutions
    Gaps(GapsCommand),

    /// Cluster gaps into emerging issues
    Emerging(EmergingCommand),

    /// Compare gaps and retrieval with and without learned articles
    Evaluate(EvaluateCommand),

    /// Add approved documents to the index
    Approve(ApproveCommand),

    /// Show index statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_overrides(
        cli.workspace,
        cli.config,
        cli.documents,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("Meridian CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Config file: {:?}", config.config_path());

    config.ensure_meridian_dir()?;

    let command_name = match &cli.command {
        Commands::Build(_) => "build",
        Commands::Query(_) => "query",
        Commands::Classify(_) => "classify",
        Commands::Gaps(_) => "gaps",
        Commands::Emerging(_) => "emerging",
        Commands::Evaluate(_) => "evaluate",
        Commands::Approve(_) => "approve",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Build(cmd) => cmd.execute(&config).await,
        Commands::Query(cmd) => cmd.execute(&config).await,
        Commands::Classify(cmd) => cmd.execute(&config).await,
        Commands::Gaps(cmd) => cmd.execute(&config).await,
        Commands::Emerging(cmd) => cmd.execute(&config).await,
        Commands::Evaluate(cmd) => cmd.execute(&config).await,
        Commands::Approve(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
