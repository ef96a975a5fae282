//! The dependency graph manager.
//!
//! Maintains the "task A waits for task B" DAG and keeps it consistent with
//! the block ledger: adding an edge whose blocker is unfinished asserts a
//! dependency block on the blocked task, completing a blocker resolves the
//! dependency blocks it produced, and removing an edge resolves exactly the
//! block that edge produced.
//!
//! Edge writers for a project serialize on a per-project advisory lock, so
//! the duplicate and cycle checks cannot be invalidated by a concurrent
//! insert between check and write.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use girder_db::models::{BlockScope, BlockType, EntityRef, Task, TaskDependency, TaskStatus};
use girder_db::queries::dependencies as db;

use crate::error::CoreError;
use crate::ledger::{self, BlockLedger, NewBlock};

/// The dependency graph operations.
pub struct DependencyGraph;

impl DependencyGraph {
    /// Record that `blocked_task_id` waits for `blocker_task_id`.
    ///
    /// Checks run in order: both tasks live, no self-edge, same project,
    /// no existing edge, no cycle. When the blocker is not already done,
    /// the matching dependency block is asserted on the blocked task in the
    /// same transaction, with the blocker's status re-read under the
    /// reference lock so a concurrently completing blocker cannot leave an
    /// orphaned block behind.
    pub async fn add_dependency(
        pool: &PgPool,
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
        actor: Uuid,
    ) -> Result<TaskDependency, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let blocked = fetch_live_task(&mut tx, blocked_task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(blocked_task_id))?;
        let blocker = fetch_live_task(&mut tx, blocker_task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(blocker_task_id))?;

        if blocked_task_id == blocker_task_id {
            return Err(CoreError::SelfDependency(blocked_task_id));
        }
        if blocked.project_id != blocker.project_id {
            return Err(CoreError::CrossProjectDependency {
                blocked_task_id,
                blocker_task_id,
            });
        }

        lock_graph(&mut tx, blocked.project_id).await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT blocked_task_id FROM task_dependencies \
             WHERE blocked_task_id = $1 AND blocker_task_id = $2",
        )
        .bind(blocked_task_id)
        .bind(blocker_task_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to check for existing dependency")?;
        if existing.is_some() {
            return Err(CoreError::DuplicateDependency {
                blocked_task_id,
                blocker_task_id,
            });
        }

        let blockers_of = load_project_edges(&mut tx, blocked.project_id).await?;
        if reaches(&blockers_of, blocker_task_id, blocked_task_id) {
            return Err(CoreError::DependencyCycle {
                blocked_task_id,
                blocker_task_id,
            });
        }

        let edge = sqlx::query_as::<_, TaskDependency>(
            "INSERT INTO task_dependencies (blocked_task_id, blocker_task_id, created_by) \
             VALUES ($1, $2, $3) \
             RETURNING *",
        )
        .bind(blocked_task_id)
        .bind(blocker_task_id)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert dependency")?;

        // Pin the reference first, then decide on the blocker's committed
        // status. A completing blocker either already resolved its blocks
        // (we see done, assert nothing) or has not committed yet and will
        // resolve ours along with the rest.
        let reference = EntityRef::task(blocker_task_id);
        ledger::lock_reference(&mut tx, &reference).await?;
        let blocker_status: TaskStatus =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = $1")
                .bind(blocker_task_id)
                .fetch_one(&mut *tx)
                .await
                .context("failed to re-read blocker status")?;

        if blocker_status != TaskStatus::Done {
            let message = format!("blocked by task: {}", blocker.title);
            BlockLedger::ensure_block_in(
                &mut tx,
                &NewBlock {
                    task_id: blocked_task_id,
                    block_type: BlockType::Dependency,
                    scope: BlockScope::Start,
                    reference: Some(reference),
                    message: &message,
                    created_by: actor,
                },
            )
            .await?;
        }

        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            blocked_task_id = %blocked_task_id,
            blocker_task_id = %blocker_task_id,
            blocker_done = blocker_status == TaskStatus::Done,
            "dependency added"
        );
        Ok(edge)
    }

    /// Delete the edge and resolve the dependency block it produced, scoped
    /// to this blocked task. Other dependents of the same blocker keep
    /// their blocks.
    pub async fn remove_dependency(
        pool: &PgPool,
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
        actor: Uuid,
    ) -> Result<(), CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let deleted = sqlx::query(
            "DELETE FROM task_dependencies \
             WHERE blocked_task_id = $1 AND blocker_task_id = $2",
        )
        .bind(blocked_task_id)
        .bind(blocker_task_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete dependency")?
        .rows_affected();
        if deleted == 0 {
            return Err(CoreError::DependencyNotFound {
                blocked_task_id,
                blocker_task_id,
            });
        }

        let resolved = BlockLedger::disable_by_reference_for_task_in(
            &mut tx,
            blocked_task_id,
            EntityRef::task(blocker_task_id),
            actor,
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            blocked_task_id = %blocked_task_id,
            blocker_task_id = %blocker_task_id,
            blocks_resolved = resolved,
            "dependency removed"
        );
        Ok(())
    }

    /// Resolve every dependency block referencing a completed blocker,
    /// across all of its dependents. Returns the number of blocks resolved.
    ///
    /// The lifecycle invokes the transaction variant inside `complete`; this
    /// entry point exists for callers reacting to completion after the fact.
    pub async fn on_blocker_completed(
        pool: &PgPool,
        blocker_task_id: Uuid,
        actor: Uuid,
    ) -> Result<u64, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let resolved = Self::on_blocker_completed_in(&mut tx, blocker_task_id, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            blocker_task_id = %blocker_task_id,
            blocks_resolved = resolved,
            "blocker completion propagated"
        );
        Ok(resolved)
    }

    pub(crate) async fn on_blocker_completed_in(
        tx: &mut Transaction<'_, Postgres>,
        blocker_task_id: Uuid,
        actor: Uuid,
    ) -> anyhow::Result<u64> {
        BlockLedger::disable_by_reference_in(tx, EntityRef::task(blocker_task_id), actor).await
    }

    /// Edges where the task is the blocked side: the tasks it waits for.
    pub async fn list_dependencies(
        pool: &PgPool,
        task_id: Uuid,
    ) -> Result<Vec<TaskDependency>, CoreError> {
        Ok(db::list_blockers_of(pool, task_id).await?)
    }

    /// Edges where the task is the blocker side: the tasks waiting for it.
    pub async fn list_dependents(
        pool: &PgPool,
        task_id: Uuid,
    ) -> Result<Vec<TaskDependency>, CoreError> {
        Ok(db::list_dependents_of(pool, task_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Adjacency of the project's graph: task -> the tasks gating it.
async fn load_project_edges(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
) -> anyhow::Result<HashMap<Uuid, Vec<Uuid>>> {
    let edges: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT td.blocked_task_id, td.blocker_task_id \
         FROM task_dependencies td \
         JOIN tasks t ON t.id = td.blocked_task_id \
         WHERE t.project_id = $1",
    )
    .bind(project_id)
    .fetch_all(&mut **tx)
    .await
    .context("failed to load project dependency edges")?;

    let mut blockers_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (blocked, blocker) in edges {
        blockers_of.entry(blocked).or_default().push(blocker);
    }
    Ok(blockers_of)
}

/// Whether `target` is reachable from `from` by repeatedly walking upstream
/// to blockers. Explicit stack and visited set, O(V + E).
///
/// Used with `from` = the new edge's blocker and `target` = its blocked
/// task: if the blocker is already (transitively) gated by the blocked task,
/// the new edge would close a cycle.
fn reaches(blockers_of: &HashMap<Uuid, Vec<Uuid>>, from: Uuid, target: Uuid) -> bool {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(upstream) = blockers_of.get(&node) {
            stack.extend(upstream.iter().copied());
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

async fn fetch_live_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
) -> anyhow::Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND deleted_at IS NULL")
        .bind(task_id)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to fetch task")
}

/// Serialize edge writers for one project's graph.
async fn lock_graph(tx: &mut Transaction<'_, Postgres>, project_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("task_graph:{project_id}"))
        .execute(&mut **tx)
        .await
        .context("failed to acquire graph lock")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
