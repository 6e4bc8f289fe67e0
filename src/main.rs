mod config;
mod crawl;
mod dates;
mod db;
mod github;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use crawl::{run_crawl, CrawlRequest};
use dates::DateRange;
use db::{Database, Granularity};
use github::GitHubClient;

/// Default search template; `{date}` is replaced with each day in the range
const DEFAULT_QUERY_TEMPLATE: &str = "android in:name,description,readme created:{date}";

#[derive(Parser)]
#[command(name = "gh-harvest")]
#[command(about = "Harvest GitHub repository metadata by creation date")]
#[command(after_help = "\x1b[36mExamples:\x1b[0m
  gh-harvest crawl --from 2015-01-01 --to 2015-01-31
  gh-harvest stats --by month
  gh-harvest scatter forks-watchers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl repositories created in an inclusive date range
    Crawl {
        /// First day to crawl (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day to crawl (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Search query template; `{date}` is substituted per day
        #[arg(long, default_value = DEFAULT_QUERY_TEMPLATE)]
        query: String,
    },

    /// Count stored repos by creation date bucket, as JSON
    Stats {
        /// Bucket width
        #[arg(long, value_enum, default_value = "day")]
        by: Granularity,
    },

    /// Dump metric pairs for scatter plots, as JSON
    Scatter {
        /// Which pair of metrics to dump
        #[arg(value_enum)]
        metric: ScatterMetric,
    },

    /// Check the GitHub search API rate limit
    RateLimit,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScatterMetric {
    /// (watchers, size) where both are positive
    WatchersSize,
    /// (forks, watchers) where both are positive
    ForksWatchers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl { from, to, query } => run_crawl_command(from, to, query).await,
        Commands::Stats { by } => show_stats(by),
        Commands::Scatter { metric } => show_scatter(metric),
        Commands::RateLimit => check_rate_limit().await,
    }
}

/// Launch a crawl on its own worker thread and wait for it or Ctrl+C
///
/// The range is validated before the worker starts, so malformed input fails
/// the command immediately. Ctrl+C only sets the shutdown flag; the worker
/// stops at the next date or page boundary.
async fn run_crawl_command(from: String, to: String, query: String) -> Result<()> {
    DateRange::new(&from, &to)?;

    let token = Config::github_token();
    if token.is_none() {
        eprintln!("\x1b[33m..\x1b[0m No GitHub token found. Search rate limit: 10 req/min");
        eprintln!("  Set GITHUB_TOKEN or run: gh auth login");
    }

    let request = CrawlRequest {
        start_date: from.clone(),
        end_date: to.clone(),
        query_template: query,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker_shutdown = shutdown.clone();

    eprintln!(
        "\x1b[36m..\x1b[0m Crawling {}..{} in the background (Ctrl+C to stop)",
        from, to
    );

    let worker = std::thread::spawn(move || -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        rt.block_on(async {
            let db = Database::open()?;
            let client = GitHubClient::new(token);

            let result = run_crawl(
                &client,
                &db,
                &request,
                |outcome| match &outcome.error {
                    Some(e) => eprintln!(
                        "\x1b[31m[crawl]\x1b[0m {}: +{} created, {} updated, failed: {}",
                        outcome.date, outcome.created, outcome.updated, e
                    ),
                    None => eprintln!(
                        "\x1b[36m[crawl]\x1b[0m {}: +{} created, {} updated",
                        outcome.date, outcome.created, outcome.updated
                    ),
                },
                || worker_shutdown.load(Ordering::SeqCst),
            )
            .await?;

            eprintln!(
                "\x1b[32mok\x1b[0m Crawled {} dates ({} failed): +{} created, {} updated",
                result.dates_processed,
                result.dates_failed,
                result.total_created,
                result.total_updated
            );
            Ok(())
        })
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n\x1b[33m!\x1b[0m Stopping after the current page...");
            shutdown.store(true, Ordering::SeqCst);
        }
        _ = wait_for_worker(&worker) => {}
    }

    match worker.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("crawl worker panicked"),
    }
}

/// Poll the worker thread so the signal listener can race against it
async fn wait_for_worker(worker: &std::thread::JoinHandle<Result<()>>) {
    while !worker.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Print created-repo counts as JSON, one bucket per entry
fn show_stats(by: Granularity) -> Result<()> {
    let db = Database::open()?;
    let rows = db.created_counts(by)?;

    let entries: Vec<serde_json::Value> = rows
        .iter()
        .map(|(bucket, count)| serde_json::json!({ "date": bucket, "count": count }))
        .collect();

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

/// Print metric pairs as parallel arrays, ready for plotting
fn show_scatter(metric: ScatterMetric) -> Result<()> {
    let db = Database::open()?;

    let output = match metric {
        ScatterMetric::WatchersSize => {
            let (watchers, sizes): (Vec<i64>, Vec<i64>) =
                db.watcher_size_pairs()?.into_iter().unzip();
            serde_json::json!({ "watchers_count": watchers, "size": sizes })
        }
        ScatterMetric::ForksWatchers => {
            let (forks, watchers): (Vec<i64>, Vec<i64>) =
                db.fork_watcher_pairs()?.into_iter().unzip();
            serde_json::json!({ "forks_count": forks, "watchers_count": watchers })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Check search rate limit
async fn check_rate_limit() -> Result<()> {
    let client = GitHubClient::new(Config::github_token());
    let rate = client.search_rate_limit().await?;

    let reset_time = chrono::DateTime::from_timestamp(rate.reset as i64, 0)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string());

    eprintln!("\x1b[36mGitHub Search API Rate Limit\x1b[0m\n");
    eprintln!("  \x1b[90mLimit:\x1b[0m     {}/min", rate.limit);
    eprintln!("  \x1b[90mRemaining:\x1b[0m {}", rate.remaining);
    eprintln!("  \x1b[90mResets at:\x1b[0m {}", reset_time);

    Ok(())
}
