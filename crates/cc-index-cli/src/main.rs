//! ccindex — CLI front end for the Common Crawl URL index pipeline.
//!
//! Drives C6 (`ingest`), C5 (`search`), C7 (`status`), the `ingested_files`
//! ledger (`store`), and prints the effective configuration (`config`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

use cc_index_store::PipelineConfig;

#[derive(Parser)]
#[command(name = "ccindex")]
#[command(about = "Common Crawl URL index pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet logging (warnings and errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file path (default: ./pipeline.toml or the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Drive matching collections through convert/sort/index/meta
    Ingest(cmd::ingest::IngestArgs),
    /// Look up every capture of a domain
    Search(cmd::search::SearchArgs),
    /// Report each collection's pipeline state
    Status(cmd::status::StatusArgs),
    /// Inspect or prune the ingested_files ledger
    Store(cmd::store::StoreArgs),
    /// Show the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = std::sync::Arc::new(cc_index_core::progress::ProgressContext::new());
    let multi = if progress.is_tty() { Some(progress.multi()) } else { None };
    cc_index_core::logging::init_logging(cli.quiet, cli.verbose, multi);

    cc_index_core::shutdown::install_signal_handlers()?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest(args) => cmd::ingest::run(args, &config, &progress),
        Command::Search(args) => cmd::search::run(args, &config),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::Store(args) => cmd::store::run(args, &config),
        Command::Config => cmd::config::run(&config),
    }
}

/// Resolve the pipeline config: an explicit `--config` path, then
/// `./pipeline.toml`, then the platform config directory, falling back to
/// defaults if none exist (§0.4's load order).
fn load_config(explicit: Option<&std::path::Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return PipelineConfig::from_file(path);
    }
    let cwd_default = PathBuf::from("./pipeline.toml");
    if cwd_default.exists() {
        return PipelineConfig::from_file(&cwd_default);
    }
    if let Some(path) = PipelineConfig::default_path() {
        if path.exists() {
            return PipelineConfig::from_file(&path);
        }
    }
    Ok(PipelineConfig::default())
}
