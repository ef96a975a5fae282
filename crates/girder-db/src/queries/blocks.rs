//! Database query functions for the `task_blocks` table (the ledger).
//!
//! Read-only helpers. Writes go through the ledger operations in
//! `girder-core`, which own the idempotency and locking rules.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BlockScope, TaskBlock};

/// Fetch a single block by ID.
pub async fn get_block(pool: &PgPool, id: Uuid) -> Result<Option<TaskBlock>> {
    let block = sqlx::query_as::<_, TaskBlock>("SELECT * FROM task_blocks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch block")?;

    Ok(block)
}

/// Active blocks for a task at a given scope, oldest first.
pub async fn get_active_blocks(
    pool: &PgPool,
    task_id: Uuid,
    scope: BlockScope,
) -> Result<Vec<TaskBlock>> {
    let blocks = sqlx::query_as::<_, TaskBlock>(
        "SELECT * FROM task_blocks \
         WHERE task_id = $1 AND scope = $2 AND is_active \
         ORDER BY created_at ASC",
    )
    .bind(task_id)
    .bind(scope)
    .fetch_all(pool)
    .await
    .context("failed to get active blocks")?;

    Ok(blocks)
}

/// Whether a task has any active block at a given scope.
pub async fn has_active_blocks(pool: &PgPool, task_id: Uuid, scope: BlockScope) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
             SELECT 1 FROM task_blocks \
             WHERE task_id = $1 AND scope = $2 AND is_active \
         )",
    )
    .bind(task_id)
    .bind(scope)
    .fetch_one(pool)
    .await
    .context("failed to check for active blocks")?;

    Ok(exists)
}

/// All blocks ever recorded for a task, resolved rows included, oldest first.
pub async fn list_blocks_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskBlock>> {
    let blocks = sqlx::query_as::<_, TaskBlock>(
        "SELECT * FROM task_blocks WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list blocks for task")?;

    Ok(blocks)
}
