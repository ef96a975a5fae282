//! Integration tests for dependency edge queries.
//!
//! Edge writes go through girder-core's graph manager; these tests seed
//! edges directly to exercise the read paths.

use sqlx::PgPool;
use uuid::Uuid;

use girder_db::queries::dependencies as db;
use girder_db::queries::tasks::{self as task_db, NewTaskRow};
use girder_test_utils::{create_test_db, drop_test_db};

async fn seed_task(pool: &PgPool, project_id: Uuid, title: &str) -> Uuid {
    let task = task_db::insert_task(
        pool,
        &NewTaskRow {
            project_id,
            title,
            description: "",
            requires_inspection: false,
            created_by: Uuid::new_v4(),
        },
    )
    .await
    .expect("failed to insert test task");
    task.id
}

async fn seed_edge(pool: &PgPool, blocked: Uuid, blocker: Uuid) {
    sqlx::query(
        "INSERT INTO task_dependencies (blocked_task_id, blocker_task_id, created_by) \
         VALUES ($1, $2, $3)",
    )
    .bind(blocked)
    .bind(blocker)
    .bind(Uuid::new_v4())
    .execute(pool)
    .await
    .expect("failed to insert test edge");
}

#[tokio::test]
async fn get_edge_finds_the_directed_pair() {
    let (pool, db_name) = create_test_db().await;
    let project = Uuid::new_v4();
    let a = seed_task(&pool, project, "a").await;
    let b = seed_task(&pool, project, "b").await;
    seed_edge(&pool, a, b).await;

    let edge = db::get_edge(&pool, a, b)
        .await
        .unwrap()
        .expect("edge should exist");
    assert_eq!(edge.blocked_task_id, a);
    assert_eq!(edge.blocker_task_id, b);

    // Direction matters.
    assert!(db::get_edge(&pool, b, a).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn listings_split_by_side() {
    let (pool, db_name) = create_test_db().await;
    let project = Uuid::new_v4();
    let hub = seed_task(&pool, project, "hub").await;
    let upstream = seed_task(&pool, project, "upstream").await;
    let down_one = seed_task(&pool, project, "down one").await;
    let down_two = seed_task(&pool, project, "down two").await;

    // hub waits on upstream; down_one and down_two wait on hub.
    seed_edge(&pool, hub, upstream).await;
    seed_edge(&pool, down_one, hub).await;
    seed_edge(&pool, down_two, hub).await;

    let blockers = db::list_blockers_of(&pool, hub).await.unwrap();
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].blocker_task_id, upstream);

    let dependents = db::list_dependents_of(&pool, hub).await.unwrap();
    let mut blocked_ids: Vec<Uuid> = dependents.iter().map(|e| e.blocked_task_id).collect();
    blocked_ids.sort_unstable();
    let mut expected = vec![down_one, down_two];
    expected.sort_unstable();
    assert_eq!(blocked_ids, expected);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_edge_violates_primary_key() {
    let (pool, db_name) = create_test_db().await;
    let project = Uuid::new_v4();
    let a = seed_task(&pool, project, "a").await;
    let b = seed_task(&pool, project, "b").await;
    seed_edge(&pool, a, b).await;

    sqlx::query(
        "INSERT INTO task_dependencies (blocked_task_id, blocker_task_id, created_by) \
         VALUES ($1, $2, $3)",
    )
    .bind(a)
    .bind(b)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .expect_err("duplicate edge should violate the primary key");

    pool.close().await;
    drop_test_db(&db_name).await;
}
