//! `ccindex ingest` — drive every matching collection through C1-C4.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use cc_index_store::{Layout, PipelineConfig};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Glob restricting which collections to drive (overrides the config file's filter)
    #[arg(long)]
    pub collection: Option<String>,
}

pub fn run(
    args: IngestArgs,
    config: &PipelineConfig,
    progress: &Arc<cc_index_core::progress::ProgressContext>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(pattern) = args.collection {
        config.collections_filter = Some(pattern);
    }

    let layout = Layout::new(&config);

    let collections = cc_index_orchestrator::run_ingest(&config, &layout, progress)?;

    if collections.is_empty() {
        println!("No collections matched.");
        return Ok(());
    }

    for collection in &collections {
        let status = cc_index_orchestrator::validate(collection, &layout)?;
        println!("{collection}: {}", status.state);
        for anomaly in &status.anomalies {
            println!("  ! {}", anomaly.message);
        }
    }

    if cc_index_core::shutdown::is_shutdown_requested() {
        anyhow::bail!("ingest stopped early: shutdown requested");
    }

    Ok(())
}
