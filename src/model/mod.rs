//! Database models module
//!
//! All ledger entity structs and their closed enums live in models.rs,
//! with table.rs kept separate for the shared DAO handle.

mod models;
mod table;

pub use models::*;

pub use table::Table;
