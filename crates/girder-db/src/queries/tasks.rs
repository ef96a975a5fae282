//! Database query functions for the `tasks` and `task_assignees` tables.
//!
//! All task reads filter out soft-deleted rows; a tombstoned task is
//! invisible to the coordination core.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Task;

/// Parameters for inserting a task row.
#[derive(Debug, Clone)]
pub struct NewTaskRow<'a> {
    pub project_id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub requires_inspection: bool,
    pub created_by: Uuid,
}

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, status `new`, timestamps).
pub async fn insert_task(pool: &PgPool, new: &NewTaskRow<'_>) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (project_id, title, description, requires_inspection, created_by, updated_by) \
         VALUES ($1, $2, $3, $4, $5, $5) \
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(new.title)
    .bind(new.description)
    .bind(new.requires_inspection)
    .bind(new.created_by)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert task {:?}", new.title))?;

    Ok(task)
}

/// Fetch a single task by ID. Soft-deleted tasks are not returned.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch task")?;

    Ok(task)
}

/// List all live tasks for a project, ordered by creation time.
pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE project_id = $1 AND deleted_at IS NULL \
         ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// Add an assignee to a task.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn add_assignee(
    pool: &PgPool,
    task_id: Uuid,
    user_id: Uuid,
    assigned_by: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_assignees (task_id, user_id, assigned_by) VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(user_id)
    .bind(assigned_by)
    .execute(pool)
    .await
    .context("failed to add assignee")?;

    Ok(())
}

/// Remove an assignee from a task. Returns the number of rows deleted
/// (0 means the user was not assigned).
pub async fn remove_assignee(pool: &PgPool, task_id: Uuid, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM task_assignees WHERE task_id = $1 AND user_id = $2")
        .bind(task_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("failed to remove assignee")?;

    Ok(result.rows_affected())
}

/// Get the user IDs assigned to a task, ordered by assignment time.
pub async fn get_assignees(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT user_id FROM task_assignees WHERE task_id = $1 ORDER BY assigned_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get assignees")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
