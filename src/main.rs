//! `manifest-harvester`: count which dependency sets Maven, npm and PyPI
//! projects declare.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and set up logging ([`logging`]).
//! 2. Load config ([`config::load_config`]), then apply CLI overrides.
//! 3. Serve the manifest query from a JSON-lines export ([`warehouse::local`]).
//! 4. Run the two-phase job ([`job::DataJob`]): rows are batched into the
//!    object store ([`batch`]), replayed through the parsers ([`parser`]) into
//!    frequency tables ([`counter`]), and added to the published aggregate
//!    ([`store`]).
//! 5. Render the requested report ([`report`]).

mod batch;
mod cli;
mod collector;
mod config;
mod counter;
mod detector;
mod job;
mod logging;
mod models;
mod parser;
mod report;
mod store;
mod warehouse;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use cli::{Cli, ReportFormat};
use config::load_config;
use job::DataJob;
use store::local::LocalBlobStore;
use store::PersistenceStore;
use warehouse::local::LocalWarehouse;
use warehouse::QueryRunner;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else if cli.quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    logging::init(level);

    let project = std::env::current_dir().context("resolving current directory")?;
    let mut config = load_config(&project, cli.config.as_deref())?;
    if let Some(dir) = cli.working_dir.clone() {
        config.job.working_dir = dir;
    }
    if let Some(root) = cli.store.clone() {
        config.store.root = root;
    }

    let warehouse = LocalWarehouse::from_json_lines(&cli.rows, config.warehouse.page_size)?;
    info!(rows = warehouse.len(), export = %cli.rows.display(), "warehouse export loaded");

    let runner = QueryRunner::new(warehouse, config.warehouse.poll_intervals());
    let store = PersistenceStore::new(LocalBlobStore::new(config.store.bucket_dir()));
    let aggregate_key = config.job.aggregate_key.clone();

    let mut job = DataJob::new(config.job, runner, store);
    let report = match job.run().await {
        Ok(report) => report,
        Err(err) => {
            error!(state = %job.state(), "harvesting failed: {:#}", err);
            return Err(err);
        }
    };

    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(&report, &aggregate_key, cli.top, cli.verbose, cli.quiet)?;
        }
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
