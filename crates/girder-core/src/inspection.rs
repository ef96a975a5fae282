//! The `InspectionOracle` trait -- the completion gate's view of inspections.
//!
//! Inspection content (checklists, findings, sign-off flows) lives in an
//! external subsystem. The core only ever asks one question: does this task
//! have an inspection in an approved outcome state? The trait is
//! object-safe so transports can hand the lifecycle a `&dyn InspectionOracle`
//! backed by whatever that subsystem is.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Read-only collaborator consulted during `complete` when a task has
/// `requires_inspection` set.
#[async_trait]
pub trait InspectionOracle: Send + Sync {
    /// Whether at least one inspection for the task is in an approved
    /// outcome state.
    async fn has_approved_inspection(&self, task_id: Uuid) -> Result<bool>;
}

// Compile-time assertion: InspectionOracle must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn InspectionOracle) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Oracle with a fixed answer, enough to prove the trait is usable as
    /// `dyn InspectionOracle`.
    struct FixedOracle(bool);

    #[async_trait]
    impl InspectionOracle for FixedOracle {
        async fn has_approved_inspection(&self, _task_id: Uuid) -> Result<bool> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn oracle_is_object_safe() {
        let oracle: Box<dyn InspectionOracle> = Box::new(FixedOracle(true));
        assert!(oracle.has_approved_inspection(Uuid::nil()).await.unwrap());

        let oracle: Box<dyn InspectionOracle> = Box::new(FixedOracle(false));
        assert!(!oracle.has_approved_inspection(Uuid::nil()).await.unwrap());
    }
}
