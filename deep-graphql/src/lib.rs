//! Deep GraphQL resolves nested "deep mutation" inputs and serves Relay-style paginated
//! connections for a GraphQL API backed by a simple record store. It consists of three sections:
//!
//! * A [graphql] layer describing the API's data model: statically declared
//!   [node types](graphql::type_system), arena-allocated [input graphs](graphql::input), the
//!   [Relay cursor codec](graphql::cursor) and [page window calculator](graphql::page), and the
//!   [backend](graphql::backend) interfaces through which everything else talks to storage.
//! * A [mutation] engine, which takes an arbitrarily nested input graph mixing "create a new
//!   child" and "link to an existing child by ID", linearizes it so children come before their
//!   parents, and persists it bottom-up, rewriting every nested child into the opaque ID it was
//!   assigned before the parent referencing it is written.
//! * A [sql] backend, which stores each record as a JSON document in a per-type table. It comes
//!   with a PostgreSQL target as well as a mock database, which is useful for lightweight testing.
//!   The backend is modular: any type implementing
//!   [`PersistenceStore`](graphql::backend::PersistenceStore) can be used instead.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod graphql;
pub mod mutation;
pub mod prelude;
#[cfg(feature = "sql")]
pub mod sql;

/// Initialize tracing.
pub fn init_logging() {
    static ONCE: Once = Once::new();

    ONCE.call_once(|| {
        color_eyre::install().unwrap();
        tracing_subscriber::fmt()
            .with_ansi(true)
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    });
}
