use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Planned,
    InProgress,
    ReadyForReview,
    Done,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::ReadyForReview => "ready_for_review",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "planned" => Ok(Self::Planned),
            "in_progress" => Ok(Self::InProgress),
            "ready_for_review" => Ok(Self::ReadyForReview),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Provenance of a block: which kind of producer asserted it.
///
/// Audit/display information only; the ledger treats all types alike except
/// that `manual` blocks may be hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Delivery,
    Decision,
    Dependency,
    Manual,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Delivery => "delivery",
            Self::Decision => "decision",
            Self::Dependency => "dependency",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for BlockType {
    type Err = BlockTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery" => Ok(Self::Delivery),
            "decision" => Ok(Self::Decision),
            "dependency" => Ok(Self::Dependency),
            "manual" => Ok(Self::Manual),
            other => Err(BlockTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BlockType`] string.
#[derive(Debug, Clone)]
pub struct BlockTypeParseError(pub String);

impl fmt::Display for BlockTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block type: {:?}", self.0)
    }
}

impl std::error::Error for BlockTypeParseError {}

// ---------------------------------------------------------------------------

/// Which transition a block gates: starting work or marking it complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockScope {
    Start,
    Done,
}

impl fmt::Display for BlockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl FromStr for BlockScope {
    type Err = BlockScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "done" => Ok(Self::Done),
            other => Err(BlockScopeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`BlockScope`] string.
#[derive(Debug, Clone)]
pub struct BlockScopeParseError(pub String);

impl fmt::Display for BlockScopeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block scope: {:?}", self.0)
    }
}

impl std::error::Error for BlockScopeParseError {}

// ---------------------------------------------------------------------------

/// Kind of entity a block's reference pointer names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefEntityType {
    Task,
    Inspection,
    Issue,
    Delivery,
    Decision,
    Location,
}

impl fmt::Display for RefEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Inspection => "inspection",
            Self::Issue => "issue",
            Self::Delivery => "delivery",
            Self::Decision => "decision",
            Self::Location => "location",
        };
        f.write_str(s)
    }
}

impl FromStr for RefEntityType {
    type Err = RefEntityTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "inspection" => Ok(Self::Inspection),
            "issue" => Ok(Self::Issue),
            "delivery" => Ok(Self::Delivery),
            "decision" => Ok(Self::Decision),
            "location" => Ok(Self::Location),
            other => Err(RefEntityTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RefEntityType`] string.
#[derive(Debug, Clone)]
pub struct RefEntityTypeParseError(pub String);

impl fmt::Display for RefEntityTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reference entity type: {:?}", self.0)
    }
}

impl std::error::Error for RefEntityTypeParseError {}

// ---------------------------------------------------------------------------

/// A typed reference pointer to the entity that produced a block.
///
/// The schema stores this as two nullable columns; in the API it is carried
/// as both-or-neither, so a block either has a full pointer or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: RefEntityType,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn new(entity_type: RefEntityType, entity_id: Uuid) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }

    /// Pointer to a task (the reference used by dependency blocks).
    pub fn task(task_id: Uuid) -> Self {
        Self::new(RefEntityType::Task, task_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A task -- the unit of work being coordinated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub requires_inspection: bool,
    pub planned_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Join row assigning a user to a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskAssignee {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub assigned_by: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// A ledger row: one standing condition gating one task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskBlock {
    pub id: Uuid,
    pub task_id: Uuid,
    pub block_type: BlockType,
    pub scope: BlockScope,
    pub ref_entity_type: Option<RefEntityType>,
    pub ref_entity_id: Option<Uuid>,
    pub message: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

impl TaskBlock {
    /// Reassemble the typed reference pointer from the two nullable columns.
    pub fn reference(&self) -> Option<EntityRef> {
        match (self.ref_entity_type, self.ref_entity_id) {
            (Some(entity_type), Some(entity_id)) => Some(EntityRef::new(entity_type, entity_id)),
            _ => None,
        }
    }
}

/// An edge in the task dependency DAG: `blocker_task_id` gates `blocked_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub blocked_task_id: Uuid,
    pub blocker_task_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One lifecycle transition, recorded append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskStatusHistory {
    pub id: i64,
    pub task_id: Uuid,
    pub from_status: TaskStatus,
    pub to_status: TaskStatus,
    pub changed_by: Uuid,
    pub changed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
