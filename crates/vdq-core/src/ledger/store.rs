//! Resume-entry operations: get, put, remove, list, prune.

use anyhow::Result;
use sqlx::Row;
use std::path::PathBuf;

use super::db::ResumeLedger;
use super::types::ResumeEntry;

impl ResumeLedger {
    /// Fetch the entry for a source URL, if any.
    pub async fn get(&self, url: &str) -> Result<Option<ResumeEntry>> {
        let row = sqlx::query(
            r#"
            SELECT partial_path, progress_percent, created_at
            FROM resume_entries
            WHERE source_url = ?1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let partial_path: String = row.get("partial_path");
        let progress_percent: f64 = row.get("progress_percent");
        let created_at: i64 = row.get("created_at");

        Ok(Some(ResumeEntry {
            partial_file_path: PathBuf::from(partial_path),
            last_progress_percent: progress_percent,
            created_time: created_at,
        }))
    }

    /// Insert or update the entry for a source URL.
    ///
    /// Same-key writes are last-write-wins; progress is not required to be
    /// monotonic. The original creation time is preserved on update.
    pub async fn put(&self, url: &str, entry: &ResumeEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_entries (source_url, partial_path, progress_percent, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(source_url) DO UPDATE
            SET partial_path = excluded.partial_path,
                progress_percent = excluded.progress_percent
            "#,
        )
        .bind(url)
        .bind(entry.partial_file_path.to_string_lossy().to_string())
        .bind(entry.last_progress_percent)
        .bind(entry.created_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove the entry for a source URL (call on successful completion).
    pub async fn remove(&self, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM resume_entries
            WHERE source_url = ?1
            "#,
        )
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All entries whose partial file still exists on disk, oldest first.
    /// Entries whose file went missing externally are excluded.
    pub async fn list_resumable(&self) -> Result<Vec<(String, ResumeEntry)>> {
        let rows = sqlx::query(
            r#"
            SELECT source_url, partial_path, progress_percent, created_at
            FROM resume_entries
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let url: String = row.get("source_url");
            let partial_path = PathBuf::from(row.get::<String, _>("partial_path"));
            if !tokio::fs::try_exists(&partial_path).await.unwrap_or(false) {
                continue;
            }
            out.push((
                url,
                ResumeEntry {
                    partial_file_path: partial_path,
                    last_progress_percent: row.get("progress_percent"),
                    created_time: row.get("created_at"),
                },
            ));
        }
        Ok(out)
    }

    /// Drop entries whose partial file is gone. Call at startup.
    /// Returns the number of entries pruned.
    pub async fn prune_stale(&self) -> Result<u64> {
        let rows = sqlx::query(
            r#"
            SELECT source_url, partial_path FROM resume_entries
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pruned = 0u64;
        for row in rows {
            let url: String = row.get("source_url");
            let partial_path = PathBuf::from(row.get::<String, _>("partial_path"));
            if tokio::fs::try_exists(&partial_path).await.unwrap_or(false) {
                continue;
            }
            self.remove(&url).await?;
            pruned += 1;
        }
        if pruned > 0 {
            tracing::info!(pruned, "dropped stale resume entries");
        }
        Ok(pruned)
    }
}
