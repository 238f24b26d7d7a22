//! `ccindex status` — run the C7 validator and print a summary table.

use anyhow::Result;
use clap::Args;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use cc_index_orchestrator::{discover_collections, validate, CollectionState};
use cc_index_store::{Layout, PipelineConfig};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Report only this collection instead of every matching one
    #[arg(long)]
    pub collection: Option<String>,
}

pub fn run(args: StatusArgs, config: &PipelineConfig) -> Result<()> {
    let layout = Layout::new(config);

    let collections = match args.collection {
        Some(id) => vec![id],
        None => discover_collections(config)?,
    };

    if collections.is_empty() {
        println!("No collections found under {}.", config.ccindex_root.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Collection").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Downloaded").fg(Color::Cyan),
            Cell::new("Converted").fg(Color::Cyan),
            Cell::new("Sorted").fg(Color::Cyan),
            Cell::new("Indexed").fg(Color::Cyan),
            Cell::new("Quarantined").fg(Color::Cyan),
            Cell::new("Expected").fg(Color::Cyan),
            Cell::new("Anomalies").fg(Color::Cyan),
        ]);

    for collection in &collections {
        let status = validate(collection, &layout)?;
        let expected = match status.expected_shards.known() {
            Some(n) => n.to_string(),
            None => "unknown".to_string(),
        };
        table.add_row(vec![
            Cell::new(&status.collection),
            state_cell(status.state),
            Cell::new(status.shard_count_downloaded),
            Cell::new(status.shard_count_converted),
            Cell::new(status.shard_count_sorted),
            Cell::new(status.shard_count_indexed),
            quarantined_cell(status.shard_count_quarantined),
            Cell::new(expected),
            anomaly_cell(status.anomalies.len()),
        ]);

        for anomaly in &status.anomalies {
            println!("  ! {}", anomaly.message);
        }
    }

    println!("{table}");
    Ok(())
}

fn state_cell(state: CollectionState) -> Cell {
    let label = state.to_string();
    if state.is_terminal() {
        Cell::new(label).fg(Color::Green)
    } else if state.is_error() {
        Cell::new(label).fg(Color::Red)
    } else {
        Cell::new(label).fg(Color::Yellow)
    }
}

fn quarantined_cell(count: usize) -> Cell {
    if count == 0 {
        Cell::new("0")
    } else {
        Cell::new(count).fg(Color::Red)
    }
}

fn anomaly_cell(count: usize) -> Cell {
    if count == 0 {
        Cell::new("0")
    } else {
        Cell::new(count).fg(Color::Red)
    }
}
