//! Data access layer for girder.
//!
//! Owns the PostgreSQL schema (embedded migrations), the connection pool,
//! the row models with their status enums, and plain query functions,
//! one module per table. Domain rules (gate checks, idempotent assertion,
//! cycle detection) live in `girder-core`; this crate only reads and
//! writes rows.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
