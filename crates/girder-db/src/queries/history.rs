//! Database query functions for the `task_status_history` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskStatusHistory;

/// Full transition history for a task, oldest first.
pub async fn list_status_history(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskStatusHistory>> {
    let rows = sqlx::query_as::<_, TaskStatusHistory>(
        "SELECT * FROM task_status_history \
         WHERE task_id = $1 \
         ORDER BY changed_at ASC, id ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list status history")?;

    Ok(rows)
}
