//! SQLite-backed ledger implementation.
//!
//! Handles connection, migrations, and timestamp helpers. Resume-entry
//! operations live in `store`, the persisted queue in `queue`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed location of the ledger below the output directory.
const LEDGER_SUBPATH: &str = ".vdq/resume.db";

/// Percent-encode a path for use in a sqlite:// URI so spaces and special
/// chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}?mode=rwc", out)
}

/// Handle to the SQLite-backed resume ledger.
///
/// Cheap to clone; every worker holds one and writes only its own key, so
/// same-key writes are plain last-write-wins.
#[derive(Clone)]
pub struct ResumeLedger {
    pub(crate) pool: Pool<Sqlite>,
}

impl ResumeLedger {
    /// Open (or create) the ledger under the output directory
    /// (`<output_dir>/.vdq/resume.db`) and run migrations.
    pub async fn open_under(output_dir: &Path) -> Result<Self> {
        let db_path = output_dir.join(LEDGER_SUBPATH);
        Self::open_at(&db_path).await
    }

    /// Open (or create) the ledger at a specific path. Creates parent dirs
    /// if needed. Intended for tests so the DB can live in a temp directory.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let ledger = ResumeLedger { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        // One table per concern: resume entries keyed by source URL, and the
        // saved pending queue in list order.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_entries (
                source_url TEXT PRIMARY KEY,
                partial_path TEXT NOT NULL,
                progress_percent REAL NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_queue (
                position INTEGER PRIMARY KEY,
                descriptor_json TEXT NOT NULL,
                status TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for ledger timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory ledger for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<ResumeLedger> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let ledger = ResumeLedger { pool };
    ledger.migrate().await?;
    Ok(ledger)
}
