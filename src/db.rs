//! SQLite persistence for harvested repository metadata
//!
//! One row per repository, keyed by GitHub's numeric id. The store exposes a
//! single upsert plus the grouped projections the stats surface reads.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::config::Config;

/// A harvested repository, normalized from the search API
///
/// Counters are optional end to end: the API may omit them, and "unknown"
/// must stay distinct from a stored zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoRecord {
    pub github_id: u64,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub clone_url: Option<String>,
    pub language: Option<String>,
    pub forks: Option<u64>,
    pub open_issues: Option<u64>,
    pub watchers: Option<u64>,
    pub size: Option<u64>,
}

/// Which side of the upsert was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

/// Bucket width for created-repo counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl Granularity {
    /// Prefix length of an RFC 3339 timestamp spanning this bucket
    fn prefix_len(self) -> usize {
        match self {
            Granularity::Day => 10,  // YYYY-MM-DD
            Granularity::Month => 7, // YYYY-MM
            Granularity::Year => 4,  // YYYY
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open() -> Result<Self> {
        let db_path = Config::db_path()?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        Self::open_at(&db_path)
    }

    /// Open or create a database at an explicit path
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Stat queries may run while a crawl writes; SQLite retries for up
        // to 30 seconds before returning SQLITE_BUSY
        conn.busy_timeout(std::time::Duration::from_secs(30))?;

        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database for testing
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS repos (
                github_id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                pushed_at TEXT,
                updated_at TEXT,
                clone_url TEXT,
                language TEXT,
                forks INTEGER,
                open_issues INTEGER,
                watchers INTEGER,
                size INTEGER,
                fetched_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_repos_created ON repos(created_at);

            -- Scatter projections only read rows where both metrics are positive
            CREATE INDEX IF NOT EXISTS idx_repos_watchers ON repos(watchers) WHERE watchers > 0;
            CREATE INDEX IF NOT EXISTS idx_repos_forks ON repos(forks) WHERE forks > 0;
            ",
        )?;
        Ok(())
    }

    /// Insert a repository or fully replace the existing row
    ///
    /// GitHub's numeric id is the only stable key; names can change upstream.
    /// An existing row is overwritten column by column, never merged, so
    /// calling again with identical data is a no-op beyond the fresh
    /// `fetched_at`.
    pub fn upsert_repo(&self, repo: &RepoRecord) -> Result<UpsertAction> {
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT github_id FROM repos WHERE github_id = ?1",
                params![repo.github_id as i64],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            self.conn.execute(
                "UPDATE repos SET
                    full_name = ?2, created_at = ?3, pushed_at = ?4, updated_at = ?5,
                    clone_url = ?6, language = ?7, forks = ?8, open_issues = ?9,
                    watchers = ?10, size = ?11, fetched_at = ?12
                 WHERE github_id = ?1",
                params![
                    repo.github_id as i64,
                    repo.full_name,
                    repo.created_at.to_rfc3339(),
                    repo.pushed_at.map(|t| t.to_rfc3339()),
                    repo.updated_at.map(|t| t.to_rfc3339()),
                    repo.clone_url,
                    repo.language,
                    repo.forks.map(|v| v as i64),
                    repo.open_issues.map(|v| v as i64),
                    repo.watchers.map(|v| v as i64),
                    repo.size.map(|v| v as i64),
                    now,
                ],
            )?;
            return Ok(UpsertAction::Updated);
        }

        self.conn.execute(
            "INSERT INTO repos (github_id, full_name, created_at, pushed_at, updated_at,
                                clone_url, language, forks, open_issues, watchers, size, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                repo.github_id as i64,
                repo.full_name,
                repo.created_at.to_rfc3339(),
                repo.pushed_at.map(|t| t.to_rfc3339()),
                repo.updated_at.map(|t| t.to_rfc3339()),
                repo.clone_url,
                repo.language,
                repo.forks.map(|v| v as i64),
                repo.open_issues.map(|v| v as i64),
                repo.watchers.map(|v| v as i64),
                repo.size.map(|v| v as i64),
                now,
            ],
        )?;
        Ok(UpsertAction::Created)
    }

    /// Fetch one stored row by external id
    #[allow(dead_code)]
    pub fn get_repo(&self, github_id: u64) -> Result<Option<RepoRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT github_id, full_name, created_at, pushed_at, updated_at,
                        clone_url, language, forks, open_issues, watchers, size
                 FROM repos WHERE github_id = ?1",
                params![github_id as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, Option<i64>>(8)?,
                        row.get::<_, Option<i64>>(9)?,
                        row.get::<_, Option<i64>>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, full_name, created, pushed, updated, clone_url, language, forks, issues, watchers, size)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(RepoRecord {
            github_id: id as u64,
            full_name,
            created_at: parse_stored_timestamp(&created)?,
            pushed_at: pushed.as_deref().map(parse_stored_timestamp).transpose()?,
            updated_at: updated.as_deref().map(parse_stored_timestamp).transpose()?,
            clone_url,
            language,
            forks: forks.map(|v| v as u64),
            open_issues: issues.map(|v| v as u64),
            watchers: watchers.map(|v| v as u64),
            size: size.map(|v| v as u64),
        }))
    }

    /// Total stored repositories
    #[allow(dead_code)]
    pub fn repo_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM repos", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Count of repos grouped by truncation of their creation time
    ///
    /// Buckets come back ascending; RFC 3339 prefixes sort chronologically.
    pub fn created_counts(&self, by: Granularity) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT substr(created_at, 1, ?1) AS bucket, COUNT(*) AS count
             FROM repos
             GROUP BY bucket
             ORDER BY bucket",
        )?;

        let rows = stmt.query_map(params![by.prefix_len() as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// (watchers, size) pairs where both are positive
    pub fn watcher_size_pairs(&self) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT watchers, size FROM repos WHERE watchers > 0 AND size > 0")?;

        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// (forks, watchers) pairs where both are positive
    pub fn fork_watcher_pairs(&self) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT forks, watchers FROM repos WHERE forks > 0 AND watchers > 0")?;

        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn parse_stored_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Helper to create a test database
    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn sample_repo(github_id: u64) -> RepoRecord {
        RepoRecord {
            github_id,
            full_name: format!("owner/repo-{}", github_id),
            created_at: utc(2015, 6, 1, 12),
            pushed_at: Some(utc(2015, 6, 2, 8)),
            updated_at: Some(utc(2015, 6, 3, 9)),
            clone_url: Some(format!("https://github.com/owner/repo-{}.git", github_id)),
            language: Some("Rust".to_string()),
            forks: Some(3),
            open_issues: Some(1),
            watchers: Some(12),
            size: Some(256),
        }
    }

    // === Upsert ===

    #[test]
    fn test_upsert_creates_then_updates() {
        let db = test_db();
        let repo = sample_repo(1);

        assert_eq!(db.upsert_repo(&repo).unwrap(), UpsertAction::Created);
        let after_first = db.get_repo(1).unwrap().unwrap();

        // Same record again: reported as an update, row unchanged
        assert_eq!(db.upsert_repo(&repo).unwrap(), UpsertAction::Updated);
        let after_second = db.get_repo(1).unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(db.repo_count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_every_field() {
        let db = test_db();
        db.upsert_repo(&sample_repo(1)).unwrap();

        // Same id, every other field different; optional fields now absent
        let replacement = RepoRecord {
            github_id: 1,
            full_name: "owner/renamed".to_string(),
            created_at: utc(2016, 1, 15, 0),
            pushed_at: None,
            updated_at: None,
            clone_url: None,
            language: None,
            forks: None,
            open_issues: None,
            watchers: None,
            size: None,
        };
        assert_eq!(db.upsert_repo(&replacement).unwrap(), UpsertAction::Updated);

        // Full replace: nothing from the first record survives
        let stored = db.get_repo(1).unwrap().unwrap();
        assert_eq!(stored, replacement);
    }

    #[test]
    fn test_renamed_repo_is_same_row() {
        let db = test_db();

        let mut repo = sample_repo(1);
        db.upsert_repo(&repo).unwrap();

        repo.full_name = "newowner/newname".to_string();
        assert_eq!(db.upsert_repo(&repo).unwrap(), UpsertAction::Updated);
        assert_eq!(db.repo_count().unwrap(), 1);
    }

    #[test]
    fn test_unknown_counter_stays_distinct_from_zero() {
        let db = test_db();

        let mut unknown = sample_repo(1);
        unknown.watchers = None;
        let mut zero = sample_repo(2);
        zero.watchers = Some(0);

        db.upsert_repo(&unknown).unwrap();
        db.upsert_repo(&zero).unwrap();

        assert_eq!(db.get_repo(1).unwrap().unwrap().watchers, None);
        assert_eq!(db.get_repo(2).unwrap().unwrap().watchers, Some(0));
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.db");

        {
            let db = Database::open_at(&path).unwrap();
            db.upsert_repo(&sample_repo(1)).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.repo_count().unwrap(), 1);
        assert!(db.get_repo(1).unwrap().is_some());
    }

    // === Stats projections ===

    #[test]
    fn test_created_counts_by_granularity() {
        let db = test_db();

        let mut a = sample_repo(1);
        a.created_at = utc(2015, 6, 1, 10);
        let mut b = sample_repo(2);
        b.created_at = utc(2015, 6, 1, 23);
        let mut c = sample_repo(3);
        c.created_at = utc(2015, 7, 4, 0);
        let mut d = sample_repo(4);
        d.created_at = utc(2016, 1, 1, 0);

        for repo in [&a, &b, &c, &d] {
            db.upsert_repo(repo).unwrap();
        }

        let days = db.created_counts(Granularity::Day).unwrap();
        assert_eq!(
            days,
            vec![
                ("2015-06-01".to_string(), 2),
                ("2015-07-04".to_string(), 1),
                ("2016-01-01".to_string(), 1),
            ]
        );

        let months = db.created_counts(Granularity::Month).unwrap();
        assert_eq!(
            months,
            vec![
                ("2015-06".to_string(), 2),
                ("2015-07".to_string(), 1),
                ("2016-01".to_string(), 1),
            ]
        );

        let years = db.created_counts(Granularity::Year).unwrap();
        assert_eq!(
            years,
            vec![("2015".to_string(), 3), ("2016".to_string(), 1)]
        );
    }

    #[test]
    fn test_scatter_pairs_require_both_metrics_positive() {
        let db = test_db();

        let full = sample_repo(1); // watchers 12, size 256, forks 3
        let mut zero_size = sample_repo(2);
        zero_size.size = Some(0);
        let mut unknown_watchers = sample_repo(3);
        unknown_watchers.watchers = None;
        let mut zero_forks = sample_repo(4);
        zero_forks.forks = Some(0);

        for repo in [&full, &zero_size, &unknown_watchers, &zero_forks] {
            db.upsert_repo(repo).unwrap();
        }

        let ws = db.watcher_size_pairs().unwrap();
        assert_eq!(ws, vec![(12, 256), (12, 256)]); // repos 1 and 4

        let fw = db.fork_watcher_pairs().unwrap();
        assert_eq!(fw, vec![(3, 12), (3, 12)]); // repos 1 and 2
    }
}
