//! SQLite persistence for hosts, their containers, scan history and the
//! vulnerabilities each completed scan produced.
//!
//! Deleting a parent row removes its children in the same transaction,
//! leaves first. The schema has no `ON DELETE CASCADE`.

mod containers;
mod db;
mod hosts;
mod models;
mod scans;


pub use db::{Store, StoreError};
pub use models::*;
