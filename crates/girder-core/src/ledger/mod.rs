//! The block ledger.
//!
//! Single source of truth for "what is currently preventing task X from
//! progressing". Producers (delivery workflow, decision workflow, the
//! dependency graph manager, manual operators) assert blocks through
//! [`BlockLedger::ensure_block`] and retract them through
//! [`BlockLedger::disable`] or the by-reference bulk operations. The state
//! machine consults active rows during transitions.
//!
//! Deduplication is owned by the database: a partial unique index over the
//! dedup tuple `(task_id, block_type, scope, ref_entity_type, ref_entity_id)`
//! filtered to active rows makes the assertion upsert race-safe. Ordering
//! between a bulk resolve and a concurrent assertion for the same reference
//! is serialized with a transaction-scoped advisory lock keyed on the
//! reference pointer.

use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use girder_db::models::{BlockScope, BlockType, EntityRef, TaskBlock};
use girder_db::queries::blocks as db;

use crate::error::CoreError;

/// Parameters for asserting a block.
#[derive(Debug, Clone)]
pub struct NewBlock<'a> {
    /// The task being gated.
    pub task_id: Uuid,
    pub block_type: BlockType,
    pub scope: BlockScope,
    /// Pointer to the producing entity; `None` for manual holds.
    pub reference: Option<EntityRef>,
    pub message: &'a str,
    pub created_by: Uuid,
}

/// The block ledger operations.
pub struct BlockLedger;

impl BlockLedger {
    /// Idempotently assert a block.
    ///
    /// If an active row already matches the dedup tuple, it is returned
    /// unchanged -- the first writer's message and creator stand until the
    /// block is resolved. Otherwise a new active row is inserted. Safe under
    /// concurrent calls for the same tuple: the insert is keyed on the
    /// partial unique dedup index, and referenced assertions additionally
    /// hold the per-reference advisory lock for the transaction.
    ///
    /// Fails with `TaskNotFound` before any write when the task is missing
    /// or tombstoned.
    pub async fn ensure_block(pool: &PgPool, new: &NewBlock<'_>) -> Result<TaskBlock, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        let task: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM tasks WHERE id = $1 AND deleted_at IS NULL")
                .bind(new.task_id)
                .fetch_optional(&mut *tx)
                .await
                .context("failed to check task existence")?;
        if task.is_none() {
            return Err(CoreError::TaskNotFound(new.task_id));
        }

        let block = Self::ensure_block_in(&mut tx, new).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            block_id = %block.id,
            task_id = %new.task_id,
            block_type = %new.block_type,
            scope = %new.scope,
            "block ensured"
        );
        Ok(block)
    }

    /// Transaction variant of [`Self::ensure_block`] for callers composing
    /// larger atomic units. The caller is responsible for having validated
    /// the task's existence within the same transaction.
    pub(crate) async fn ensure_block_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewBlock<'_>,
    ) -> anyhow::Result<TaskBlock> {
        if let Some(reference) = &new.reference {
            lock_reference(tx, reference).await?;
        }

        // The arbiter is the partial dedup index. The no-op update makes the
        // statement return the surviving row on conflict, so an existing
        // active block comes back unchanged.
        let block = sqlx::query_as::<_, TaskBlock>(
            "INSERT INTO task_blocks \
                 (task_id, block_type, scope, ref_entity_type, ref_entity_id, message, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (task_id, block_type, scope, ref_entity_type, ref_entity_id) \
                 WHERE is_active \
             DO UPDATE SET is_active = TRUE \
             RETURNING *",
        )
        .bind(new.task_id)
        .bind(new.block_type)
        .bind(new.scope)
        .bind(new.reference.map(|r| r.entity_type))
        .bind(new.reference.map(|r| r.entity_id))
        .bind(new.message)
        .bind(new.created_by)
        .fetch_one(&mut **tx)
        .await
        .context("failed to ensure block")?;

        Ok(block)
    }

    /// Deactivate a single block by id, stamping resolution metadata.
    ///
    /// Fails with `BlockNotFound` if the row does not exist. Disabling an
    /// already-inactive block is a no-op that returns the row as-is.
    pub async fn disable(pool: &PgPool, block_id: Uuid, actor: Uuid) -> Result<TaskBlock, CoreError> {
        let updated = sqlx::query_as::<_, TaskBlock>(
            "UPDATE task_blocks \
             SET is_active = FALSE, resolved_at = NOW(), resolved_by = $2 \
             WHERE id = $1 AND is_active \
             RETURNING *",
        )
        .bind(block_id)
        .bind(actor)
        .fetch_optional(pool)
        .await
        .context("failed to disable block")?;

        match updated {
            Some(block) => {
                tracing::info!(block_id = %block_id, task_id = %block.task_id, "block resolved");
                Ok(block)
            }
            None => match db::get_block(pool, block_id).await? {
                Some(block) => Ok(block),
                None => Err(CoreError::BlockNotFound(block_id)),
            },
        }
    }

    /// Bulk-deactivate all active blocks bearing a reference pointer,
    /// regardless of which task they belong to. Returns the number of rows
    /// resolved.
    ///
    /// Intentionally blunt: one producer event (a decision approved, a
    /// blocker task completed) may clear blocks on several tasks without the
    /// caller enumerating them.
    pub async fn disable_by_reference(
        pool: &PgPool,
        reference: EntityRef,
        actor: Uuid,
    ) -> Result<u64, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let count = Self::disable_by_reference_in(&mut tx, reference, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(reference = %reference, count, "blocks resolved by reference");
        Ok(count)
    }

    /// Transaction variant of [`Self::disable_by_reference`].
    pub(crate) async fn disable_by_reference_in(
        tx: &mut Transaction<'_, Postgres>,
        reference: EntityRef,
        actor: Uuid,
    ) -> anyhow::Result<u64> {
        lock_reference(tx, &reference).await?;

        let result = sqlx::query(
            "UPDATE task_blocks \
             SET is_active = FALSE, resolved_at = NOW(), resolved_by = $3 \
             WHERE ref_entity_type = $1 AND ref_entity_id = $2 AND is_active",
        )
        .bind(reference.entity_type)
        .bind(reference.entity_id)
        .bind(actor)
        .execute(&mut **tx)
        .await
        .context("failed to disable blocks by reference")?;

        Ok(result.rows_affected())
    }

    /// Like [`Self::disable_by_reference`], but scoped to a single task:
    /// only that task's blocks bearing the reference are resolved. Used when
    /// the producer relationship being retracted names one task, e.g.
    /// removing one dependency edge of a blocker that has several dependents.
    pub async fn disable_by_reference_for_task(
        pool: &PgPool,
        task_id: Uuid,
        reference: EntityRef,
        actor: Uuid,
    ) -> Result<u64, CoreError> {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        let count =
            Self::disable_by_reference_for_task_in(&mut tx, task_id, reference, actor).await?;
        tx.commit().await.context("failed to commit transaction")?;

        tracing::info!(
            task_id = %task_id,
            reference = %reference,
            count,
            "blocks resolved by reference for task"
        );
        Ok(count)
    }

    /// Transaction variant of [`Self::disable_by_reference_for_task`].
    pub(crate) async fn disable_by_reference_for_task_in(
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
        reference: EntityRef,
        actor: Uuid,
    ) -> anyhow::Result<u64> {
        lock_reference(tx, &reference).await?;

        let result = sqlx::query(
            "UPDATE task_blocks \
             SET is_active = FALSE, resolved_at = NOW(), resolved_by = $4 \
             WHERE task_id = $1 AND ref_entity_type = $2 AND ref_entity_id = $3 AND is_active",
        )
        .bind(task_id)
        .bind(reference.entity_type)
        .bind(reference.entity_id)
        .bind(actor)
        .execute(&mut **tx)
        .await
        .context("failed to disable blocks by reference for task")?;

        Ok(result.rows_affected())
    }

    /// Active blocks for a task at a given scope, oldest first.
    pub async fn get_active_blocks(
        pool: &PgPool,
        task_id: Uuid,
        scope: BlockScope,
    ) -> Result<Vec<TaskBlock>, CoreError> {
        Ok(db::get_active_blocks(pool, task_id, scope).await?)
    }

    /// Existence probe: whether any active block gates the task at the scope.
    pub async fn has_active_blocks(
        pool: &PgPool,
        task_id: Uuid,
        scope: BlockScope,
    ) -> Result<bool, CoreError> {
        Ok(db::has_active_blocks(pool, task_id, scope).await?)
    }

    /// Every block ever recorded for a task, resolved rows included.
    pub async fn list_blocks(pool: &PgPool, task_id: Uuid) -> Result<Vec<TaskBlock>, CoreError> {
        Ok(db::list_blocks_for_task(pool, task_id).await?)
    }

    /// Hard-delete a manual hold.
    ///
    /// Restricted to `manual` blocks: every other type records producer
    /// provenance and must be resolved, never deleted. Fails with
    /// `NotManualBlock` (leaving the row untouched) otherwise.
    pub async fn delete_manual_block(
        pool: &PgPool,
        block_id: Uuid,
        actor: Uuid,
    ) -> Result<(), CoreError> {
        let block = db::get_block(pool, block_id)
            .await?
            .ok_or(CoreError::BlockNotFound(block_id))?;

        if block.block_type != BlockType::Manual {
            return Err(CoreError::NotManualBlock {
                block_id,
                block_type: block.block_type,
            });
        }

        sqlx::query("DELETE FROM task_blocks WHERE id = $1")
            .bind(block_id)
            .execute(pool)
            .await
            .context("failed to delete manual block")?;

        tracing::info!(block_id = %block_id, task_id = %block.task_id, actor = %actor, "manual block deleted");
        Ok(())
    }
}

/// Serialize writers touching the same reference pointer.
///
/// `pg_advisory_xact_lock` held until the surrounding transaction ends, keyed
/// on the printed `type:id` form of the reference. Reentrant within one
/// transaction, so callers may take it early to pin a reference before
/// deciding whether to write.
pub(crate) async fn lock_reference(
    tx: &mut Transaction<'_, Postgres>,
    reference: &EntityRef,
) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(reference.to_string())
        .execute(&mut **tx)
        .await
        .context("failed to acquire reference lock")?;
    Ok(())
}
