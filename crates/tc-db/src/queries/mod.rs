//! Raw SQL query functions, one module per table.

pub mod messages;
pub mod tasks;
