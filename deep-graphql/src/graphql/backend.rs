//! Interfaces provided by a backend data store consumed by a GraphQL API.
//!
//! The entrypoint to this system of traits is [`PersistenceStore`], which describes the interface
//! by which the mutation engine and query resolvers interact with storage. The SQL backend
//! implements [`PersistenceStore`] and the GraphQL layer interacts with it exclusively through
//! this trait.
//!
//! Query resolvers which need to turn a persisted [`Record`] back into a GraphQL object (such as
//! the Relay `node(id)` field) do so through a [`NodeTypeRegistry`], which maps table names to
//! output type constructors.

use super::type_system::{Guid, MalformedId, Record, RowId};
use async_trait::async_trait;
use derivative::Derivative;
use snafu::Snafu;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;

/// Storage for persisted records.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Errors reported while reading or writing records.
    type Error: Error + Send + Sync + 'static;

    /// Insert a record into `table`, returning the ID generated for it.
    async fn insert(&self, table: &str, record: &Record) -> Result<RowId, Self::Error>;

    /// Fetch the record with ID `id` from `table`, if there is one.
    async fn fetch_by_id(&self, table: &str, id: RowId) -> Result<Option<Record>, Self::Error>;
}

/// Errors encountered while loading an object by its opaque ID.
#[derive(Debug, Snafu)]
pub enum LoadError {
    #[snafu(display("{source}"))]
    InvalidId { source: MalformedId },

    #[snafu(display("error loading {guid}: {message}"))]
    Store { guid: Guid, message: String },
}

impl LoadError {
    fn store(guid: &Guid, err: impl Display) -> Self {
        Self::Store {
            guid: guid.clone(),
            message: err.to_string(),
        }
    }
}

/// Fetch the record identified by an opaque ID.
pub async fn fetch_by_guid<S>(store: &S, id: &str) -> Result<Option<Record>, LoadError>
where
    S: PersistenceStore + ?Sized,
{
    let guid: Guid = id.parse().map_err(|source| LoadError::InvalidId { source })?;
    store
        .fetch_by_id(guid.table(), guid.row())
        .await
        .map_err(|err| LoadError::store(&guid, err))
}

/// A function which materializes a persisted record as an output object.
pub type Constructor<O> = fn(Guid, Record) -> O;

/// A mapping from table names to output types.
pub trait NodeTypeRegistry {
    /// The type of materialized objects, usually a GraphQL union or interface.
    type Output;

    /// The constructor for objects stored in `table`.
    fn output_type_for(&self, table: &str) -> Option<Constructor<Self::Output>>;
}

/// A [`NodeTypeRegistry`] populated at startup.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""), Default(bound = ""))]
pub struct NodeRegistry<O> {
    constructors: HashMap<String, Constructor<O>>,
}

impl<O> NodeRegistry<O> {
    /// Register the constructor for objects stored in `table`.
    pub fn register(mut self, table: impl Into<String>, constructor: Constructor<O>) -> Self {
        self.constructors.insert(table.into(), constructor);
        self
    }

    /// Load and materialize the object identified by an opaque ID.
    ///
    /// Returns [`None`] if the ID refers to an unregistered table or to a row which does not
    /// exist.
    pub async fn load<S>(&self, store: &S, id: &str) -> Result<Option<O>, LoadError>
    where
        S: PersistenceStore + ?Sized,
    {
        let guid: Guid = id.parse().map_err(|source| LoadError::InvalidId { source })?;
        let Some(constructor) = self.output_type_for(guid.table()) else {
            tracing::debug!(%guid, "no output type registered");
            return Ok(None);
        };
        let record = store
            .fetch_by_id(guid.table(), guid.row())
            .await
            .map_err(|err| LoadError::store(&guid, err))?;
        Ok(record.map(|record| constructor(guid, record)))
    }
}

impl<O> NodeTypeRegistry for NodeRegistry<O> {
    type Output = O;

    fn output_type_for(&self, table: &str) -> Option<Constructor<O>> {
        self.constructors.get(table).copied()
    }
}
