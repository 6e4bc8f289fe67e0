//! Core crawl pipeline: date-partitioned GitHub search feeding the repo store
//!
//! One crawl run walks a date range one day at a time; each day becomes a
//! single search query whose pages are fetched under the API's search rate
//! limit and upserted record by record.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::dates::{DateRange, InvalidRange};
use crate::db::{Database, RepoRecord, UpsertAction};
use crate::github::{GitHubClient, RateLimit, RawSearchRepo, MAX_PER_PAGE};

/// Pad added to the API's reset instant, absorbing clock skew between this
/// process and the API server
pub const RATE_LIMIT_PAD_SECS: u64 = 5;

/// A search record that could not be mapped to a storable row
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("record has no repository id")]
    MissingId,
    #[error("repo {id}: missing full name")]
    MissingFullName { id: u64 },
    #[error("{full_name}: missing creation timestamp")]
    MissingCreatedAt { full_name: String },
    #[error("{full_name}: unparseable {field} timestamp '{value}'")]
    BadTimestamp {
        full_name: String,
        field: &'static str,
        value: String,
    },
}

/// Map a raw search record into a storable row
///
/// The numeric id, full name, and creation timestamp are required: the id is
/// the upsert key and the stats surface groups rows by creation time.
/// Everything else stays optional; absent is stored as absent, never as zero.
pub fn normalize_repo(raw: &RawSearchRepo) -> Result<RepoRecord, NormalizeError> {
    let github_id = raw.id.ok_or(NormalizeError::MissingId)?;
    let full_name = raw
        .full_name
        .clone()
        .ok_or(NormalizeError::MissingFullName { id: github_id })?;

    let created_at = match &raw.created_at {
        Some(value) => parse_timestamp(&full_name, "created_at", value)?,
        None => return Err(NormalizeError::MissingCreatedAt { full_name }),
    };
    let pushed_at = match &raw.pushed_at {
        Some(value) => Some(parse_timestamp(&full_name, "pushed_at", value)?),
        None => None,
    };
    let updated_at = match &raw.updated_at {
        Some(value) => Some(parse_timestamp(&full_name, "updated_at", value)?),
        None => None,
    };

    Ok(RepoRecord {
        github_id,
        full_name,
        created_at,
        pushed_at,
        updated_at,
        clone_url: raw.clone_url.clone(),
        language: raw.language.clone(),
        forks: raw.forks_count,
        open_issues: raw.open_issues_count,
        watchers: raw.watchers_count,
        size: raw.size,
    })
}

fn parse_timestamp(
    full_name: &str,
    field: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| NormalizeError::BadTimestamp {
            full_name: full_name.to_string(),
            field,
            value: value.to_string(),
        })
}

/// Time left until the padded reset instant, if any is still ahead of `now`
fn reset_wait(reset: u64, now: u64) -> Option<Duration> {
    let target = reset + RATE_LIMIT_PAD_SECS;
    if target <= now {
        return None;
    }
    Some(Duration::from_secs(target - now))
}

/// Sleep until the search quota resets
///
/// Suspends only the calling task; stat queries and other work keep running.
async fn wait_for_search_reset(rate: &RateLimit, now: u64) {
    let Some(wait) = reset_wait(rate.reset, now) else {
        return;
    };

    eprintln!(
        "\x1b[33m[crawl]\x1b[0m search quota exhausted (0/{}), waiting {}s for reset",
        rate.limit,
        wait.as_secs()
    );

    tokio::time::sleep(wait).await;

    eprintln!("\x1b[32m[crawl]\x1b[0m search quota reset, resuming");
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Counts accumulated by one query's crawl, plus the error that ended it early
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub created: usize,
    pub updated: usize,
    pub error: Option<anyhow::Error>,
}

/// Crawl every result page of one search query into the store
///
/// The search quota is checked before each page; an exhausted quota suspends
/// this crawl until the padded reset instant. A failed page fetch ends the
/// crawl with the counts gathered so far. A record that fails normalization
/// or its store write is logged and skipped; it never ends the page.
pub async fn crawl_query<S>(
    client: &GitHubClient,
    db: &Database,
    query: &str,
    should_stop: S,
) -> QueryOutcome
where
    S: Fn() -> bool,
{
    let mut outcome = QueryOutcome::default();
    let mut page: u32 = 1;

    loop {
        if should_stop() {
            break;
        }

        match client.search_rate_limit().await {
            Ok(rate) if rate.remaining == 0 => wait_for_search_reset(&rate, unix_now()).await,
            Ok(_) => {}
            Err(e) => {
                // The page fetch itself will surface real transport trouble
                eprintln!("\x1b[33m[crawl]\x1b[0m rate limit check failed: {:#}", e);
            }
        }

        let result = match client.search_page(query, page, MAX_PER_PAGE).await {
            Ok(p) => p,
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        };

        for raw in &result.items {
            match normalize_repo(raw) {
                Ok(record) => match db.upsert_repo(&record) {
                    Ok(UpsertAction::Created) => outcome.created += 1,
                    Ok(UpsertAction::Updated) => outcome.updated += 1,
                    Err(e) => {
                        eprintln!(
                            "\x1b[31m[crawl]\x1b[0m store write failed for {}: {:#}",
                            record.full_name, e
                        );
                    }
                },
                Err(e) => {
                    eprintln!("\x1b[33m[crawl]\x1b[0m skipped record: {}", e);
                }
            }
        }

        match result.next_page {
            Some(next) => page = next,
            None => break,
        }
    }

    outcome
}

/// A crawl request: inclusive date range plus the query template each day is
/// substituted into
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub start_date: String,
    pub end_date: String,
    /// `{date}` is replaced with the day being crawled
    pub query_template: String,
}

/// Per-date outcome, emitted after each day's crawl
#[derive(Debug)]
pub struct DateOutcome {
    pub date: String,
    pub created: usize,
    pub updated: usize,
    pub error: Option<String>,
}

/// Totals from a complete crawl run
#[derive(Debug, Default)]
pub struct CrawlRunResult {
    pub dates_processed: usize,
    pub dates_failed: usize,
    pub total_created: usize,
    pub total_updated: usize,
}

/// Run one crawl over a date range, one day per query
///
/// Dates run strictly sequentially: the search quota is global, so fanning
/// out would not finish any sooner. Each date is an independent unit of
/// work; a failed date is reported through `on_date` and the range carries
/// on. Only a malformed range fails the run as a whole, before any date is
/// crawled. `should_stop` is honored before each date and at every page
/// boundary.
pub async fn run_crawl<F, S>(
    client: &GitHubClient,
    db: &Database,
    request: &CrawlRequest,
    mut on_date: F,
    should_stop: S,
) -> Result<CrawlRunResult, InvalidRange>
where
    F: FnMut(&DateOutcome),
    S: Fn() -> bool,
{
    let days = DateRange::new(&request.start_date, &request.end_date)?;
    let mut result = CrawlRunResult::default();

    for day in days {
        if should_stop() {
            break;
        }

        let date = day.to_string();
        let query = request.query_template.replace("{date}", &date);
        let outcome = crawl_query(client, db, &query, &should_stop).await;

        result.dates_processed += 1;
        result.total_created += outcome.created;
        result.total_updated += outcome.updated;
        if outcome.error.is_some() {
            result.dates_failed += 1;
        }

        on_date(&DateOutcome {
            date,
            created: outcome.created,
            updated: outcome.updated,
            error: outcome.error.map(|e| format!("{:#}", e)),
        });
    }

    Ok(result)
}
