//! Persistence layer — libSQL-backed store handle, units of work, migrations.

pub mod libsql_backend;
pub mod migrations;

pub use libsql_backend::{Savepoint, Store, UnitOfWork};
