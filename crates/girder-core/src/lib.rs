//! Task coordination core.
//!
//! Three cooperating components over one PostgreSQL store:
//!
//! - [`ledger`] -- the block ledger, the single source of truth for "what is
//!   currently preventing task X from progressing". Producers assert blocks
//!   idempotently and retract them singly or in bulk by reference.
//! - [`lifecycle`] -- the task state machine. Forward transitions consult
//!   the ledger atomically and append to the status history.
//! - [`graph`] -- the dependency DAG manager. Keeps prerequisite edges
//!   acyclic and keeps dependency blocks in sync with the edge set.
//!
//! Everything else (deliveries, decisions, inspections, notifications,
//! transports) is an external collaborator talking through these modules
//! and the [`inspection::InspectionOracle`] seam.

pub mod error;
pub mod graph;
pub mod inspection;
pub mod ledger;
pub mod lifecycle;

pub use error::{CoreError, ErrorKind};
