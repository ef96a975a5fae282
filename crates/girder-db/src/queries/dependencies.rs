//! Database query functions for the `task_dependencies` table.
//!
//! Edge writes happen inside the dependency graph manager's transactions
//! in `girder-core`; only reads live here.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskDependency;

/// Fetch a single edge, if present.
pub async fn get_edge(
    pool: &PgPool,
    blocked_task_id: Uuid,
    blocker_task_id: Uuid,
) -> Result<Option<TaskDependency>> {
    let edge = sqlx::query_as::<_, TaskDependency>(
        "SELECT * FROM task_dependencies \
         WHERE blocked_task_id = $1 AND blocker_task_id = $2",
    )
    .bind(blocked_task_id)
    .bind(blocker_task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch dependency edge")?;

    Ok(edge)
}

/// Edges where the given task is the blocked side (its prerequisites).
pub async fn list_blockers_of(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskDependency>> {
    let edges = sqlx::query_as::<_, TaskDependency>(
        "SELECT * FROM task_dependencies \
         WHERE blocked_task_id = $1 \
         ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list blockers")?;

    Ok(edges)
}

/// Edges where the given task is the blocker side (the tasks it gates).
pub async fn list_dependents_of(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskDependency>> {
    let edges = sqlx::query_as::<_, TaskDependency>(
        "SELECT * FROM task_dependencies \
         WHERE blocker_task_id = $1 \
         ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list dependents")?;

    Ok(edges)
}
