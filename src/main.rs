mod api;
mod checkpoint;
mod collector;
mod config;
mod db;
mod dedup;
mod error;
mod extract;
mod keywords;
mod record;
mod report;
mod schema;

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::api::NaverClient;
use crate::collector::Collector;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "medicollect", about = "Medicine data collector for the Naver encyclopedia")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, store schema and seed keyword list
    Init,
    /// Collect medicine records (resumes from the last checkpoint)
    Run {
        /// Max new records to collect this run (default: unlimited)
        #[arg(short = 'n', long)]
        max: Option<usize>,
        /// Discard any existing checkpoint and start over
        #[arg(long)]
        fresh: bool,
    },
    /// Generate an HTML report over a range of collected records
    Report {
        /// First record, 1-based
        #[arg(short, long, default_value = "1")]
        start: usize,
        /// Last record, inclusive (default: everything collected)
        #[arg(short, long)]
        end: Option<usize>,
    },
    /// Show collection statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let config = Config::from_env()?;
            let conn = db::connect(&config.db_path())?;
            db::init_schema(&conn)?;
            keywords::KeywordQueue::open(config.keywords_dir())?;
            fs::create_dir_all(config.reports_dir())?;
            println!("Initialized data directory: {}", config.data_dir.display());
            Ok(())
        }
        Commands::Run { max, fresh } => {
            let config = Config::from_env()?;
            let client = Arc::new(NaverClient::new(&config)?);
            let search: Arc<dyn api::SearchApi> = client.clone();
            let fetcher: Arc<dyn api::PageFetcher> = client;
            let mut collector = Collector::open(config, search, fetcher, fresh)?;

            // First Ctrl-C finishes the in-flight page and saves; a second
            // one kills the process the usual way.
            let (tx, rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing current page");
                    let _ = tx.send(true);
                }
            });

            let summary = collector.run(max, rx).await?;
            println!(
                "Done: {} collected ({} complete, {} partial, {} failed), {} duplicates skipped.",
                summary.processed,
                summary.success,
                summary.partial,
                summary.failed,
                summary.duplicates_skipped
            );
            Ok(())
        }
        Commands::Report { start, end } => {
            let config = Config::from_env()?;
            let conn = db::connect(&config.db_path())?;
            db::init_schema(&conn)?;

            let total = db::record_count(&conn)?;
            if total == 0 {
                println!("No records collected yet. Run 'run' first.");
                return Ok(());
            }
            let start = start.max(1);
            let end = end.unwrap_or(total).min(total);
            let records = db::fetch_range(&conn, start, end)?;
            if records.is_empty() {
                println!("No records in range {start}..{end}.");
                return Ok(());
            }

            let data = report::aggregate(&records, start, end);
            let html = report::render_html(&data);
            fs::create_dir_all(config.reports_dir())?;
            let path = config
                .reports_dir()
                .join(format!("report_{start}_{end}.html"));
            fs::write(&path, html)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!(
                "Report {} written: {} ({} records: {} complete, {} partial, {} failed)",
                data.report_id,
                path.display(),
                data.total_medicines,
                data.successful_extractions,
                data.partial_extractions,
                data.failed_extractions
            );
            Ok(())
        }
        Commands::Stats => {
            let config = Config::from_env()?;
            let conn = db::connect(&config.db_path())?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Total:   {}", s.total);
            println!("Success: {}", s.success);
            println!("Partial: {}", s.partial);
            println!("Failed:  {}", s.failed);

            let manager = checkpoint::CheckpointManager::new(config.checkpoint_path());
            match manager.load() {
                Ok(Some(cp)) => println!(
                    "\nCheckpoint: keyword {} (cursor {}), {} processed, updated {}",
                    cp.keyword_index + 1,
                    cp.page_cursor.as_deref().unwrap_or("start"),
                    cp.total_processed,
                    cp.updated_at.format("%Y-%m-%d %H:%M:%S")
                ),
                Ok(None) => println!("\nNo checkpoint."),
                Err(e) => println!("\nCheckpoint unreadable: {e}"),
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
