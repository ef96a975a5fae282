//! The task lifecycle state machine.
//!
//! Tasks move `new -> planned -> in_progress -> ready_for_review -> done`,
//! with `done` reachable straight from `in_progress` and `cancelled`
//! reachable from any non-terminal status. Every transition is one
//! transaction: the task row is locked with `SELECT ... FOR UPDATE`,
//! preconditions are checked against the locked row, the status update is
//! still guarded by the expected prior status, and a history row is
//! appended. Concurrent transitions on the same task serialize on the row
//! lock; the loser re-reads the winner's status and fails its precondition.

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use girder_db::models::{BlockScope, Task, TaskBlock, TaskStatus};
use girder_db::queries::tasks as db;

use crate::error::CoreError;
use crate::graph::DependencyGraph;
use crate::inspection::InspectionOracle;

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub project_id: Uuid,
    pub title: &'a str,
    pub description: &'a str,
    pub requires_inspection: bool,
    /// Initial assignees; may be empty (assignment is mandatory at `plan`).
    pub assignee_ids: &'a [Uuid],
}

/// Parameters for planning a task.
#[derive(Debug, Clone)]
pub struct PlanTask<'a> {
    /// Scheduling is what planning means; the date is not optional.
    pub planned_date: DateTime<Utc>,
    /// Replaces the current assignee set. Must be non-empty.
    pub assignee_ids: &'a [Uuid],
}

/// The lifecycle operations.
pub struct TaskLifecycle;

impl TaskLifecycle {
    /// Whether `from -> to` is a legal transition.
    ///
    /// Pure table lookup; the operations below each enforce the row that
    /// applies to them, this is the whole map in one place.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (New, Planned)
                | (Planned, InProgress)
                | (InProgress, ReadyForReview)
                | (InProgress, Done)
                | (ReadyForReview, Done)
                | (New | Planned | InProgress | ReadyForReview, Cancelled)
        )
    }

    /// Create a task in `new` status together with its initial assignee
    /// rows. No history row is written: history records transitions, and
    /// creation is not one.
    pub async fn create(
        pool: &PgPool,
        new: &NewTask<'_>,
        actor: Uuid,
    ) -> Result<Task, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks (project_id, title, description, requires_inspection, created_by, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             RETURNING *",
        )
        .bind(new.project_id)
        .bind(new.title)
        .bind(new.description)
        .bind(new.requires_inspection)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert task")?;

        for user_id in new.assignee_ids {
            insert_assignee(&mut tx, task.id, *user_id, actor).await?;
        }

        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            task_id = %task.id,
            project_id = %new.project_id,
            assignees = new.assignee_ids.len(),
            "task created"
        );
        Ok(task)
    }

    /// `new -> planned`. Stamps the planned date and replaces the assignee
    /// set, which must be non-empty: an unstaffed plan is not a plan.
    pub async fn plan(
        pool: &PgPool,
        task_id: Uuid,
        plan: &PlanTask<'_>,
        actor: Uuid,
    ) -> Result<Task, CoreError> {
        if plan.assignee_ids.is_empty() {
            return Err(CoreError::NoAssignees {
                task_id,
                action: "plan",
            });
        }

        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let task = lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        if !Self::is_valid_transition(task.status, TaskStatus::Planned) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "plan",
            });
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks \
             SET status = $3, planned_date = $4, updated_by = $5, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(task_id)
        .bind(task.status)
        .bind(TaskStatus::Planned)
        .bind(plan.planned_date)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update task status")?
        .ok_or(CoreError::TransitionConflict {
            task_id,
            expected: task.status,
        })?;

        sqlx::query("DELETE FROM task_assignees WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .context("failed to clear assignees")?;
        for user_id in plan.assignee_ids {
            insert_assignee(&mut tx, task_id, *user_id, actor).await?;
        }

        record_history(&mut tx, task_id, task.status, TaskStatus::Planned, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            task_id = %task_id,
            planned_date = %plan.planned_date,
            assignees = plan.assignee_ids.len(),
            "task planned"
        );
        Ok(updated)
    }

    /// `planned -> in_progress`. Refused while the assignee set is empty or
    /// any start-scope block is active; the `Blocked` error carries the
    /// offending rows, oldest first. Stamps `started_at`.
    pub async fn start(pool: &PgPool, task_id: Uuid, actor: Uuid) -> Result<Task, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let task = lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        if !Self::is_valid_transition(task.status, TaskStatus::InProgress) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "start",
            });
        }

        let assignees: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM task_assignees WHERE task_id = $1")
                .bind(task_id)
                .fetch_one(&mut *tx)
                .await
                .context("failed to count assignees")?;
        if assignees == 0 {
            return Err(CoreError::NoAssignees {
                task_id,
                action: "start",
            });
        }

        let blocks = active_blocks_in(&mut tx, task_id, BlockScope::Start).await?;
        if !blocks.is_empty() {
            return Err(CoreError::Blocked {
                task_id,
                action: "start",
                blocks,
            });
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks \
             SET status = $3, started_at = NOW(), updated_by = $4, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(task_id)
        .bind(task.status)
        .bind(TaskStatus::InProgress)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update task status")?
        .ok_or(CoreError::TransitionConflict {
            task_id,
            expected: task.status,
        })?;

        record_history(&mut tx, task_id, task.status, TaskStatus::InProgress, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(task_id = %task_id, "task started");
        Ok(updated)
    }

    /// `in_progress -> ready_for_review`. No gates; review is where problems
    /// are supposed to surface.
    pub async fn submit_for_review(
        pool: &PgPool,
        task_id: Uuid,
        actor: Uuid,
    ) -> Result<Task, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let task = lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        if !Self::is_valid_transition(task.status, TaskStatus::ReadyForReview) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "submit",
            });
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks \
             SET status = $3, updated_by = $4, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(task_id)
        .bind(task.status)
        .bind(TaskStatus::ReadyForReview)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update task status")?
        .ok_or(CoreError::TransitionConflict {
            task_id,
            expected: task.status,
        })?;

        record_history(&mut tx, task_id, task.status, TaskStatus::ReadyForReview, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(task_id = %task_id, "task submitted for review");
        Ok(updated)
    }

    /// `in_progress | ready_for_review -> done`. Refused while done-scope
    /// blocks are active; when the task requires inspection, the oracle must
    /// confirm an approved inspection. The oracle is consulted before the
    /// transaction opens so no row lock is held across the collaborator
    /// call (`requires_inspection` is immutable after creation, so the
    /// pre-read answer stays valid). Stamps `completed_at` and, in the same
    /// transaction, resolves every dependency block referencing this task so
    /// dependents unblock atomically with the completion.
    pub async fn complete(
        pool: &PgPool,
        oracle: &dyn InspectionOracle,
        task_id: Uuid,
        actor: Uuid,
    ) -> Result<Task, CoreError> {
        let task = db::get_task(pool, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;
        if !Self::is_valid_transition(task.status, TaskStatus::Done) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "complete",
            });
        }
        if task.requires_inspection && !oracle.has_approved_inspection(task_id).await? {
            return Err(CoreError::InspectionPending(task_id));
        }

        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let task = lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        if !Self::is_valid_transition(task.status, TaskStatus::Done) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "complete",
            });
        }

        let blocks = active_blocks_in(&mut tx, task_id, BlockScope::Done).await?;
        if !blocks.is_empty() {
            return Err(CoreError::Blocked {
                task_id,
                action: "complete",
                blocks,
            });
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks \
             SET status = $3, completed_at = NOW(), updated_by = $4, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(task_id)
        .bind(task.status)
        .bind(TaskStatus::Done)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update task status")?
        .ok_or(CoreError::TransitionConflict {
            task_id,
            expected: task.status,
        })?;

        record_history(&mut tx, task_id, task.status, TaskStatus::Done, actor).await?;
        let resolved = DependencyGraph::on_blocker_completed_in(&mut tx, task_id, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            task_id = %task_id,
            dependent_blocks_resolved = resolved,
            "task completed"
        );
        Ok(updated)
    }

    /// Any non-terminal status `-> cancelled`. No gates, no timestamps.
    ///
    /// Dependents' blocks are left standing: a cancelled blocker still
    /// blocks until someone removes the dependency edge, which is the
    /// deliberate recovery path.
    pub async fn cancel(pool: &PgPool, task_id: Uuid, actor: Uuid) -> Result<Task, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let task = lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        if !Self::is_valid_transition(task.status, TaskStatus::Cancelled) {
            return Err(CoreError::InvalidState {
                task_id,
                current: task.status,
                action: "cancel",
            });
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks \
             SET status = $3, updated_by = $4, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING *",
        )
        .bind(task_id)
        .bind(task.status)
        .bind(TaskStatus::Cancelled)
        .bind(actor)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update task status")?
        .ok_or(CoreError::TransitionConflict {
            task_id,
            expected: task.status,
        })?;

        record_history(&mut tx, task_id, task.status, TaskStatus::Cancelled, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(task_id = %task_id, from = %task.status, "task cancelled");
        Ok(updated)
    }

    /// Tombstone a task and clean up its entanglements: dependency edges
    /// touching it in either direction are deleted, and active blocks on
    /// other tasks that reference it are resolved. The task's own block rows
    /// stay as audit record.
    pub async fn soft_delete(pool: &PgPool, task_id: Uuid, actor: Uuid) -> Result<(), CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        lock_task(&mut tx, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        sqlx::query(
            "UPDATE tasks SET deleted_at = NOW(), updated_by = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(task_id)
        .bind(actor)
        .execute(&mut *tx)
        .await
        .context("failed to tombstone task")?;

        let edges = sqlx::query(
            "DELETE FROM task_dependencies WHERE blocked_task_id = $1 OR blocker_task_id = $1",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete dependency edges")?
        .rows_affected();

        let blocks = crate::ledger::BlockLedger::disable_by_reference_in(
            &mut tx,
            girder_db::models::EntityRef::task(task_id),
            actor,
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            task_id = %task_id,
            edges_removed = edges,
            blocks_resolved = blocks,
            "task soft-deleted"
        );
        Ok(())
    }

    /// Add one assignee. Idempotent: assigning an already-assigned user is
    /// a no-op.
    pub async fn add_assignee(
        pool: &PgPool,
        task_id: Uuid,
        user_id: Uuid,
        actor: Uuid,
    ) -> Result<(), CoreError> {
        db::get_task(pool, task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;
        db::add_assignee(pool, task_id, user_id, actor).await?;

        tracing::info!(task_id = %task_id, user_id = %user_id, actor = %actor, "assignee added");
        Ok(())
    }

    /// Remove one assignee. Fails `AssigneeNotFound` when the user was not
    /// assigned.
    pub async fn remove_assignee(
        pool: &PgPool,
        task_id: Uuid,
        user_id: Uuid,
        actor: Uuid,
    ) -> Result<(), CoreError> {
        let removed = db::remove_assignee(pool, task_id, user_id).await?;
        if removed == 0 {
            return match db::get_task(pool, task_id).await? {
                None => Err(CoreError::TaskNotFound(task_id)),
                Some(_) => Err(CoreError::AssigneeNotFound { task_id, user_id }),
            };
        }

        tracing::info!(task_id = %task_id, user_id = %user_id, actor = %actor, "assignee removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Fetch the live task row under `FOR UPDATE`, serializing transitions and
/// deletion per task for the rest of the transaction.
async fn lock_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
) -> anyhow::Result<Option<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(task_id)
    .fetch_optional(&mut **tx)
    .await
    .context("failed to lock task row")
}

async fn active_blocks_in(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    scope: BlockScope,
) -> anyhow::Result<Vec<TaskBlock>> {
    sqlx::query_as::<_, TaskBlock>(
        "SELECT * FROM task_blocks \
         WHERE task_id = $1 AND is_active AND scope = $2 \
         ORDER BY created_at ASC",
    )
    .bind(task_id)
    .bind(scope)
    .fetch_all(&mut **tx)
    .await
    .context("failed to load active blocks")
}

async fn insert_assignee(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    user_id: Uuid,
    actor: Uuid,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO task_assignees (task_id, user_id, assigned_by) \
         VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(user_id)
    .bind(actor)
    .execute(&mut **tx)
    .await
    .context("failed to insert assignee")?;
    Ok(())
}

async fn record_history(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    actor: Uuid,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO task_status_history (task_id, from_status, to_status, changed_by) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(task_id)
    .bind(from)
    .bind(to)
    .bind(actor)
    .execute(&mut **tx)
    .await
    .context("failed to record status history")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
