//! Integration tests for database migrations.
//!
//! Each test gets its own database in the shared PostgreSQL instance (see
//! `girder-test-utils`), with migrations applied, and drops it on completion
//! so tests are fully isolated and idempotent.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use girder_test_utils::{create_test_db, drop_test_db};

/// Expected tables created by the migrations.
const EXPECTED_TABLES: &[&str] = &[
    "task_assignees",
    "task_blocks",
    "task_dependencies",
    "task_status_history",
    "tasks",
];

#[tokio::test]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public'",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");

    // Filter out the sqlx metadata table; sort client-side so the assertion
    // does not depend on the server's collation.
    let mut user_tables: Vec<&str> = rows
        .iter()
        .map(|(name,)| name.as_str())
        .filter(|t| !t.starts_with("_sqlx"))
        .collect();
    user_tables.sort_unstable();

    assert_eq!(
        user_tables, EXPECTED_TABLES,
        "migrations should create exactly the expected tables"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    // create_test_db already ran migrations once; a second run must be a
    // no-op.
    girder_db::pool::run_migrations(&pool)
        .await
        .expect("second migration run should succeed (idempotent)");

    for table in EXPECTED_TABLES {
        let query = format!("SELECT COUNT(*) AS cnt FROM {table}");
        let row = sqlx::query(&query)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("failed to count {table}: {e}"));
        let count: i64 = row.get("cnt");
        assert_eq!(count, 0, "table {table} should be empty after migrations");
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

// ---------------------------------------------------------------------------
// Schema constraints
// ---------------------------------------------------------------------------

async fn seed_task(pool: &PgPool) -> Uuid {
    let row: (Uuid,) = sqlx::query_as(
        "INSERT INTO tasks (project_id, title, created_by, updated_by) \
         VALUES ($1, 'constraint-probe', $2, $2) \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .fetch_one(pool)
    .await
    .expect("failed to insert test task");
    row.0
}

#[tokio::test]
async fn duplicate_active_referenced_block_is_rejected() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;
    let ref_id = Uuid::new_v4();
    let actor = Uuid::new_v4();

    let insert = "INSERT INTO task_blocks \
                  (task_id, block_type, scope, ref_entity_type, ref_entity_id, message, created_by) \
                  VALUES ($1, 'delivery', 'start', 'delivery', $2, 'waiting on rebar', $3)";

    sqlx::query(insert)
        .bind(task_id)
        .bind(ref_id)
        .bind(actor)
        .execute(&pool)
        .await
        .expect("first block insert should succeed");

    let err = sqlx::query(insert)
        .bind(task_id)
        .bind(ref_id)
        .bind(actor)
        .execute(&pool)
        .await
        .expect_err("second identical active block should violate the dedup index");
    assert!(
        err.to_string().contains("idx_task_blocks_active_dedup"),
        "unexpected error: {err}"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_active_manual_block_is_rejected_despite_null_reference() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;
    let actor = Uuid::new_v4();

    // NULLS NOT DISTINCT: two active manual blocks (NULL reference columns)
    // must still collide.
    let insert = "INSERT INTO task_blocks (task_id, block_type, scope, message, created_by) \
                  VALUES ($1, 'manual', 'start', 'hold', $2)";

    sqlx::query(insert)
        .bind(task_id)
        .bind(actor)
        .execute(&pool)
        .await
        .expect("first manual block should succeed");

    sqlx::query(insert)
        .bind(task_id)
        .bind(actor)
        .execute(&pool)
        .await
        .expect_err("duplicate active manual block should violate the dedup index");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn resolved_block_does_not_collide_with_new_active_one() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;
    let actor = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO task_blocks (task_id, block_type, scope, message, created_by, is_active, resolved_at, resolved_by) \
         VALUES ($1, 'manual', 'start', 'old hold', $2, FALSE, NOW(), $2)",
    )
    .bind(task_id)
    .bind(actor)
    .execute(&pool)
    .await
    .expect("inactive block insert should succeed");

    // The partial index only covers active rows, so history does not block
    // re-assertion.
    sqlx::query(
        "INSERT INTO task_blocks (task_id, block_type, scope, message, created_by) \
         VALUES ($1, 'manual', 'start', 'new hold', $2)",
    )
    .bind(task_id)
    .bind(actor)
    .execute(&pool)
    .await
    .expect("active block should not collide with a resolved one");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn half_null_reference_is_rejected() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    sqlx::query(
        "INSERT INTO task_blocks (task_id, block_type, scope, ref_entity_type, message, created_by) \
         VALUES ($1, 'delivery', 'start', 'delivery', 'half pointer', $2)",
    )
    .bind(task_id)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .expect_err("reference type without id should violate the both-or-neither check");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn self_dependency_edge_is_rejected_by_schema() {
    let (pool, db_name) = create_test_db().await;
    let task_id = seed_task(&pool).await;

    sqlx::query(
        "INSERT INTO task_dependencies (blocked_task_id, blocker_task_id, created_by) \
         VALUES ($1, $1, $2)",
    )
    .bind(task_id)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .expect_err("self-edge should violate the check constraint");

    pool.close().await;
    drop_test_db(&db_name).await;
}
