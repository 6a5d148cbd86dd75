//! sciharvest: collect study metadata and PDFs for a topic from the major
//! literature databases, then write CSV, JSON and an HTML report.

mod config;

use std::path::PathBuf;

use clap::Parser;
use sciharvest_ingestion::export::{run_timestamp, write_outputs};
use sciharvest_ingestion::models::SearchQuery;
use sciharvest_ingestion::pipeline::{run_harvest, HarvestJob};
use sciharvest_ingestion::query_store::QueryStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{parse_databases, secs, Config};

/// Harvest scientific studies on a topic.
#[derive(Debug, Parser)]
#[command(name = "sciharvest")]
#[command(version, about, long_about = None)]
struct Args {
    /// Main search query
    #[arg(short, long)]
    query: Option<String>,

    /// Refinement terms, OR-ed together and AND-ed with the query
    #[arg(short, long, num_args = 1..)]
    terms: Vec<String>,

    /// Databases to search, or `all`
    #[arg(short, long, num_args = 1..)]
    databases: Vec<String>,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum results per database
    #[arg(long)]
    max_results: Option<usize>,

    /// Seconds to wait between records
    #[arg(long)]
    delay: Option<f64>,

    /// Process only the first record of each database
    #[arg(long)]
    test: bool,

    /// Save the query for later runs
    #[arg(long)]
    save_query: bool,

    /// Use the saved query
    #[arg(long)]
    load_saved: bool,

    /// Metadata only, no PDF resolution or download
    #[arg(long)]
    no_download: bool,

    /// Keep artifacts that already exist on disk
    #[arg(long)]
    no_overwrite: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sciharvest=debug,info")),
        )
        .init();

    let args = Args::parse();
    info!("sciharvest {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let output_dir = args.output.clone().unwrap_or_else(|| config.harvest.output_dir.clone());
    let store = QueryStore::new(&output_dir);

    let mut query = args.query.clone().map(|q| SearchQuery::new(q, args.terms.clone()));
    if args.load_saved {
        match store.load() {
            Ok(Some(saved)) => {
                info!(query = %saved.query, terms = ?saved.terms, "Loaded saved query");
                query = Some(saved);
            }
            Ok(None) => warn!(path = %store.path().display(), "No saved query found"),
            Err(e) => warn!(path = %store.path().display(), error = %e, "Saved query unreadable"),
        }
    }
    let Some(query) = query.filter(|q| !q.query.trim().is_empty()) else {
        error!("No query provided. Pass --query or --load-saved with a saved query.");
        std::process::exit(2);
    };

    if args.save_query {
        if let Err(e) = store.save(&query) {
            warn!(error = %e, "Could not save query");
        }
    }

    let database_keys = if args.databases.is_empty() { &config.harvest.databases } else { &args.databases };
    let databases = parse_databases(database_keys);
    if databases.is_empty() {
        error!(databases = ?database_keys, "No valid databases selected");
        std::process::exit(2);
    }

    let job = HarvestJob {
        query,
        databases,
        output_dir: output_dir.clone(),
        delay: secs(args.delay.unwrap_or(config.harvest.delay_secs)),
        max_results: args.max_results.unwrap_or(config.harvest.max_results),
        overwrite: config.harvest.overwrite && !args.no_overwrite,
        test_mode: args.test,
        download: !args.no_download,
    };
    if job.test_mode {
        info!("Test mode: processing one record per database");
    }

    let ctx = config.source_context();
    let result = run_harvest(&job, &ctx).await;

    for summary in &result.per_source {
        info!(
            source = %summary.source,
            found = summary.found,
            kept = summary.kept,
            downloaded = summary.downloaded,
            synthesized = summary.synthesized,
            missing = summary.missing,
            "Database summary"
        );
    }
    for e in &result.errors {
        warn!("{}", e);
    }

    if result.records.is_empty() {
        warn!("No studies found");
        return Ok(());
    }

    let files = write_outputs(&result, &output_dir, &run_timestamp())?;
    info!(
        studies = result.records.len(),
        pdfs = result.downloaded + result.synthesized,
        report = %files.report.display(),
        "Done"
    );
    Ok(())
}
