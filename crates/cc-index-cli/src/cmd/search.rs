//! `ccindex search` — look up every capture of a domain (C5).

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::Args;

use cc_index_search::{MatchMode, SearchQuery};
use cc_index_store::{Layout, PipelineConfig};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Domain to search for, e.g. example.gov or www.example.gov
    pub domain: String,

    /// Match only the exact host (default: prefix match, covering subdomains)
    #[arg(long, conflicts_with = "prefix")]
    pub exact: bool,

    /// Match the domain and every subdomain (default)
    #[arg(long)]
    pub prefix: bool,

    /// Restrict to captures from a single crawl year
    #[arg(long)]
    pub year: Option<u16>,

    /// Stop after this many results
    #[arg(long)]
    pub limit: Option<usize>,

    /// Emit one JSON object per line instead of a plain-text summary
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: SearchArgs, config: &PipelineConfig) -> Result<()> {
    let layout = Layout::new(config);

    let mode = if args.exact { MatchMode::Exact } else { MatchMode::Prefix };
    let mut query = SearchQuery::new(args.domain, mode);
    if let Some(year) = args.year {
        query = query.year_filter(year);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    let cancel = AtomicBool::new(false);
    let results = cc_index_search::search(&layout, &query, &cancel)?;

    let mut count = 0usize;
    for pointer in results {
        let pointer = pointer?;
        if args.json {
            println!("{}", serde_json::to_string(&pointer)?);
        } else {
            println!(
                "{} {} {} offset={} length={} [{}]",
                pointer.ts, pointer.url, pointer.warc_filename, pointer.warc_offset, pointer.warc_length, pointer.collection
            );
        }
        count += 1;
    }

    if count == 0 && !args.json {
        eprintln!("No captures found.");
    }

    Ok(())
}
