//! Persistence backend based on a SQL database (specifically PostgreSQL).

pub mod db;
pub mod store;

pub use store::*;
