//! End-to-end scenario: ledger, lifecycle, and graph working together the way
//! a site coordinator would drive them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use girder_db::models::{BlockScope, BlockType, TaskStatus};
use girder_db::queries::history as history_db;
use girder_db::queries::tasks as task_db;
use girder_test_utils::{create_test_db, drop_test_db};

use girder_core::graph::DependencyGraph;
use girder_core::inspection::InspectionOracle;
use girder_core::ledger::{BlockLedger, NewBlock};
use girder_core::lifecycle::{NewTask, PlanTask, TaskLifecycle};
use girder_core::CoreError;

struct FixedOracle(bool);

#[async_trait]
impl InspectionOracle for FixedOracle {
    async fn has_approved_inspection(&self, _task_id: Uuid) -> Result<bool> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn foundation_waits_for_excavation() {
    let (pool, db_name) = create_test_db().await;
    let project = Uuid::new_v4();
    let foreman = Uuid::new_v4();
    let crew = [Uuid::new_v4(), Uuid::new_v4()];
    let date = Utc.with_ymd_and_hms(2026, 10, 5, 7, 0, 0).unwrap();

    let excavate = TaskLifecycle::create(
        &pool,
        &NewTask {
            project_id: project,
            title: "excavate",
            description: "strip topsoil, dig to grade",
            requires_inspection: false,
            assignee_ids: &[],
        },
        foreman,
    )
    .await
    .unwrap();
    let pour = TaskLifecycle::create(
        &pool,
        &NewTask {
            project_id: project,
            title: "pour foundation",
            description: "",
            requires_inspection: false,
            assignee_ids: &[],
        },
        foreman,
    )
    .await
    .unwrap();

    // Plan the pour and declare that it waits on excavation.
    TaskLifecycle::plan(
        &pool,
        pour.id,
        &PlanTask {
            planned_date: date,
            assignee_ids: &crew,
        },
        foreman,
    )
    .await
    .unwrap();
    DependencyGraph::add_dependency(&pool, pour.id, excavate.id, foreman)
        .await
        .unwrap();

    // The pour cannot start while excavation is outstanding.
    let err = TaskLifecycle::start(&pool, pour.id, foreman)
        .await
        .expect_err("dependency should gate the start");
    match err {
        CoreError::Blocked { blocks, .. } => {
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].block_type, BlockType::Dependency);
            assert_eq!(blocks[0].message, "blocked by task: excavate");
        }
        other => panic!("expected Blocked, got {other:?}"),
    }

    // Excavation runs its own lifecycle to completion.
    TaskLifecycle::plan(
        &pool,
        excavate.id,
        &PlanTask {
            planned_date: date,
            assignee_ids: &[crew[0]],
        },
        foreman,
    )
    .await
    .unwrap();
    TaskLifecycle::start(&pool, excavate.id, foreman).await.unwrap();
    TaskLifecycle::complete(&pool, &FixedOracle(true), excavate.id, foreman)
        .await
        .unwrap();

    // Completion resolved the dependency block; the pour may proceed.
    assert!(
        !BlockLedger::has_active_blocks(&pool, pour.id, BlockScope::Start)
            .await
            .unwrap()
    );
    let started = TaskLifecycle::start(&pool, pour.id, foreman)
        .await
        .expect("start should succeed once unblocked");
    assert_eq!(started.status, TaskStatus::InProgress);

    // A late manual hold pauses nothing retroactively but gates completion.
    let hold = BlockLedger::ensure_block(
        &pool,
        &NewBlock {
            task_id: pour.id,
            block_type: BlockType::Manual,
            scope: BlockScope::Done,
            reference: None,
            message: "await cure test results",
            created_by: foreman,
        },
    )
    .await
    .unwrap();
    let err = TaskLifecycle::complete(&pool, &FixedOracle(true), pour.id, foreman)
        .await
        .expect_err("manual hold should gate completion");
    assert!(matches!(err, CoreError::Blocked { .. }));

    BlockLedger::disable(&pool, hold.id, foreman).await.unwrap();
    let done = TaskLifecycle::complete(&pool, &FixedOracle(true), pour.id, foreman)
        .await
        .expect("complete should succeed after the hold clears");
    assert_eq!(done.status, TaskStatus::Done);

    // The record tells the whole story.
    let history = history_db::list_status_history(&pool, pour.id).await.unwrap();
    let pairs: Vec<(TaskStatus, TaskStatus)> =
        history.iter().map(|h| (h.from_status, h.to_status)).collect();
    assert_eq!(
        pairs,
        vec![
            (TaskStatus::New, TaskStatus::Planned),
            (TaskStatus::Planned, TaskStatus::InProgress),
            (TaskStatus::InProgress, TaskStatus::Done),
        ]
    );
    let final_row = task_db::get_task(&pool, pour.id).await.unwrap().unwrap();
    assert!(final_row.started_at.is_some());
    assert!(final_row.completed_at.is_some());

    // Block audit: one resolved dependency block, one resolved manual hold.
    let audit = BlockLedger::list_blocks(&pool, pour.id).await.unwrap();
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().all(|b| !b.is_active));

    pool.close().await;
    drop_test_db(&db_name).await;
}
