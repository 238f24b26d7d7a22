//! `ccindex store` — inspect or prune the `ingested_files` idempotence ledger.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use duckdb::Connection;

use cc_index_store::{Layout, PipelineConfig};

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub action: StoreAction,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// List every ledger entry for a collection's shard DB
    Ls {
        /// Collection ID to inspect
        collection: String,
    },
    /// Remove ledger entries whose source file no longer exists on disk
    Gc {
        /// Collection ID to prune
        collection: String,
    },
    /// Show the exact ledger row for one source path
    Inspect {
        /// Collection ID the path was ingested into
        collection: String,
        /// Source path as recorded in the ledger
        path: String,
    },
}

pub fn run(args: StoreArgs, config: &PipelineConfig) -> Result<()> {
    let layout = Layout::new(config);
    match args.action {
        StoreAction::Ls { collection } => ls(&layout, &collection),
        StoreAction::Gc { collection } => gc(&layout, &collection),
        StoreAction::Inspect { collection, path } => inspect(&layout, &collection, &path),
    }
}

fn open_collection_db(layout: &Layout, collection: &str) -> Result<Connection> {
    let db_path = layout.collection_db_path(collection);
    Connection::open(&db_path).with_context(|| format!("opening {}", db_path.display()))
}

fn ls(layout: &Layout, collection: &str) -> Result<()> {
    let conn = open_collection_db(layout, collection)?;
    cc_index_store::ledger::ensure_schema(&conn)?;
    let entries = cc_index_store::ledger::list(&conn)?;

    if entries.is_empty() {
        println!("No ledger entries for {collection}.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Path").fg(Color::Cyan),
            Cell::new("Size").fg(Color::Cyan),
            Cell::new("Ingested At").fg(Color::Cyan),
            Cell::new("Rows").fg(Color::Cyan),
        ]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.path),
            Cell::new(entry.size_bytes),
            Cell::new(&entry.ingested_at),
            Cell::new(entry.rows),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn gc(layout: &Layout, collection: &str) -> Result<()> {
    let conn = open_collection_db(layout, collection)?;
    cc_index_store::ledger::ensure_schema(&conn)?;
    let removed = cc_index_store::ledger::prune_missing(&conn)?;

    if removed.is_empty() {
        println!("Nothing to prune for {collection}.");
    } else {
        println!("Pruned {} ledger entr{}:", removed.len(), if removed.len() == 1 { "y" } else { "ies" });
        for path in &removed {
            println!("  {path}");
        }
    }
    Ok(())
}

fn inspect(layout: &Layout, collection: &str, path: &str) -> Result<()> {
    let conn = open_collection_db(layout, collection)?;
    cc_index_store::ledger::ensure_schema(&conn)?;
    let entries = cc_index_store::ledger::list(&conn)?;

    match entries.into_iter().find(|e| e.path == path) {
        Some(entry) => {
            println!("path:        {}", entry.path);
            println!("size_bytes:  {}", entry.size_bytes);
            println!("mtime_ns:    {}", entry.mtime_ns);
            println!("ingested_at: {}", entry.ingested_at);
            println!("rows:        {}", entry.rows);
        }
        None => println!("No ledger entry for {path} in {collection}."),
    }
    Ok(())
}
