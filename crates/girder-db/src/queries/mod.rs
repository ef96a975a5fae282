//! Query functions, one module per table.

pub mod blocks;
pub mod dependencies;
pub mod history;
pub mod tasks;
