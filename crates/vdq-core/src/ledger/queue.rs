//! Persisted pending queue: ordered descriptors + last known status.
//!
//! Only non-completed items are saved. A restart can never resurrect a live
//! transfer, so `Downloading` is normalized to `Queued` on save.

use anyhow::Result;
use sqlx::Row;

use super::db::ResumeLedger;
use super::types::SavedQueueItem;
use crate::job::{JobDescriptor, JobStatus};

impl ResumeLedger {
    /// Replace the saved queue with the given items, preserving order.
    pub async fn save_queue(&self, items: &[SavedQueueItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM saved_queue")
            .execute(&mut *tx)
            .await?;

        for item in items {
            if item.status == JobStatus::Completed {
                continue;
            }
            let status = match item.status {
                JobStatus::Downloading => JobStatus::Queued,
                other => other,
            };
            let descriptor_json = serde_json::to_string(&item.descriptor)?;
            sqlx::query(
                r#"
                INSERT INTO saved_queue (position, descriptor_json, status)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(item.position)
            .bind(descriptor_json)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load the saved queue in list order.
    pub async fn load_queue(&self) -> Result<Vec<SavedQueueItem>> {
        let rows = sqlx::query(
            r#"
            SELECT position, descriptor_json, status
            FROM saved_queue
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let position: i64 = row.get("position");
            let descriptor_json: String = row.get("descriptor_json");
            let status_str: String = row.get("status");
            let descriptor: JobDescriptor = serde_json::from_str(&descriptor_json)?;
            out.push(SavedQueueItem {
                position,
                descriptor,
                status: JobStatus::from_str(&status_str),
            });
        }
        Ok(out)
    }
}
