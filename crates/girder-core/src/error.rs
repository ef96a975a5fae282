//! Error types for the coordination core.
//!
//! Variants are granular so call sites can match precisely; [`CoreError::kind`]
//! collapses them into the five failure kinds transports care about. Nothing
//! here is retried automatically: a `Blocked` or `InvalidState` failure means
//! the caller must wait for exactly the condition the payload describes.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use girder_db::models::{BlockType, TaskBlock, TaskStatus};

/// Failure raised by a ledger, lifecycle, or graph operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("block not found: {0}")]
    BlockNotFound(Uuid),

    #[error("task {task_id} has no assignee {user_id}")]
    AssigneeNotFound { task_id: Uuid, user_id: Uuid },

    #[error("task {blocked_task_id} has no dependency on task {blocker_task_id}")]
    DependencyNotFound {
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
    },

    #[error("cannot {action} task {task_id}: status is {current}")]
    InvalidState {
        task_id: Uuid,
        current: TaskStatus,
        action: &'static str,
    },

    /// A transition was refused because active blocks exist. Carries the
    /// blocking rows, oldest first, so callers can show actionable detail.
    #[error("cannot {action} task {task_id}: {n} active block(s)", n = .blocks.len())]
    Blocked {
        task_id: Uuid,
        action: &'static str,
        blocks: Vec<TaskBlock>,
    },

    /// A concurrent writer advanced the task past the expected status.
    #[error("task {task_id} was modified concurrently (expected status {expected})")]
    TransitionConflict { task_id: Uuid, expected: TaskStatus },

    #[error("task {blocked_task_id} already depends on task {blocker_task_id}")]
    DuplicateDependency {
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
    },

    #[error("dependency of task {blocked_task_id} on task {blocker_task_id} would create a cycle")]
    DependencyCycle {
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
    },

    #[error("task {0} cannot depend on itself")]
    SelfDependency(Uuid),

    #[error("tasks {blocked_task_id} and {blocker_task_id} belong to different projects")]
    CrossProjectDependency {
        blocked_task_id: Uuid,
        blocker_task_id: Uuid,
    },

    #[error("cannot {action} task {task_id} without at least one assignee")]
    NoAssignees { task_id: Uuid, action: &'static str },

    #[error("task {0} requires an approved inspection before completion")]
    InspectionPending(Uuid),

    #[error("block {block_id} is a {block_type} block; only manual blocks can be deleted")]
    NotManualBlock {
        block_id: Uuid,
        block_type: BlockType,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The five failure kinds surfaced to callers, plus `Internal` for plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Blocked,
    Conflict,
    InvalidOperation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::Blocked => "blocked",
            Self::Conflict => "conflict",
            Self::InvalidOperation => "invalid_operation",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl CoreError {
    /// Collapse the variant into its failure kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_)
            | Self::BlockNotFound(_)
            | Self::AssigneeNotFound { .. }
            | Self::DependencyNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Blocked { .. } => ErrorKind::Blocked,
            Self::TransitionConflict { .. }
            | Self::DuplicateDependency { .. }
            | Self::DependencyCycle { .. } => ErrorKind::Conflict,
            Self::SelfDependency(_)
            | Self::CrossProjectDependency { .. }
            | Self::NoAssignees { .. }
            | Self::InspectionPending(_)
            | Self::NotManualBlock { .. } => ErrorKind::InvalidOperation,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_as_documented() {
        let id = Uuid::new_v4();
        assert_eq!(CoreError::TaskNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            CoreError::InvalidState {
                task_id: id,
                current: TaskStatus::New,
                action: "start",
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            CoreError::Blocked {
                task_id: id,
                action: "start",
                blocks: vec![],
            }
            .kind(),
            ErrorKind::Blocked
        );
        assert_eq!(
            CoreError::DependencyCycle {
                blocked_task_id: id,
                blocker_task_id: id,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(CoreError::SelfDependency(id).kind(), ErrorKind::InvalidOperation);
        assert_eq!(
            CoreError::Internal(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn blocked_display_reports_count() {
        let err = CoreError::Blocked {
            task_id: Uuid::nil(),
            action: "start",
            blocks: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("0 active block(s)"), "unexpected: {msg}");
    }

    #[test]
    fn invalid_state_display_names_current_status() {
        let err = CoreError::InvalidState {
            task_id: Uuid::nil(),
            current: TaskStatus::Done,
            action: "start",
        };
        assert!(err.to_string().contains("status is done"));
    }
}
