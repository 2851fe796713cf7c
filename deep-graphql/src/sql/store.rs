//! Instantiation of a GraphQL [`PersistenceStore`] for a SQL database.
//!
//! Each registered table is stored as a SQL table with an auto-incrementing `id` column and a
//! `data` column holding the JSON-encoded [`Record`]. Tables are created lazily, the first time
//! they are touched.

use super::db::{self, ConstraintKind, CreateTable, Insert, Row, SchemaColumn, SelectExt, Type};
use crate::graphql::{
    backend::PersistenceStore,
    type_system::{Catalog, Record, RowId},
};
use async_std::sync::Mutex;
use async_trait::async_trait;
use snafu::Snafu;
use std::collections::HashSet;
use std::fmt::Display;

#[cfg(feature = "postgres")]
/// A store implemented using a PostgreSQL database.
pub type PostgresStore = SqlStore<db::postgres::Connection>;

#[cfg(any(test, feature = "mocks"))]
/// A store implemented using the in-memory mock database.
pub type MockStore = SqlStore<db::mock::Connection>;

/// Errors encountered when reading or writing records.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{error}"))]
    Sql { error: String },

    #[snafu(display("table {table} is not registered"))]
    UnknownTable { table: String },

    #[snafu(display("error encoding record for {table}: {source}"))]
    Encode {
        table: String,
        source: serde_json::Error,
    },

    #[snafu(display("error decoding record {table}:{id}: {error}"))]
    Decode {
        table: String,
        id: RowId,
        error: String,
    },
}

impl Error {
    /// An error in the SQL layer.
    pub fn sql(error: impl Display) -> Self {
        Self::Sql {
            error: error.to_string(),
        }
    }

    fn decode(table: &str, id: RowId, error: impl Display) -> Self {
        Self::Decode {
            table: table.into(),
            id,
            error: error.to_string(),
        }
    }
}

/// A store implemented using a SQL database.
#[derive(Debug)]
pub struct SqlStore<Db> {
    db: Db,
    tables: HashSet<String>,
    created: Mutex<HashSet<String>>,
}

impl<Db: db::Connection> SqlStore<Db> {
    /// A store which persists records for `tables` in `db`.
    pub fn new<I>(db: Db, tables: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            db,
            tables: tables.into_iter().map(|table| table.into()).collect(),
            created: Default::default(),
        }
    }

    /// A store which persists records for every node type in `catalog`.
    pub fn for_catalog(db: Db, catalog: &Catalog) -> Self {
        Self::new(db, catalog.tables())
    }

    /// The underlying connection to the database.
    pub fn inner(&self) -> &Db {
        &self.db
    }

    /// Unwrap this store to get at the underlying connection.
    pub fn into_inner(self) -> Db {
        self.db
    }

    /// Create `table` if this store has not already done so.
    async fn ensure_table(&self, table: &str) -> Result<(), Error> {
        let mut created = self.created.lock().await;
        if created.contains(table) {
            return Ok(());
        }
        self.db
            .create_table(
                table,
                vec![
                    SchemaColumn::new("id", Type::Serial),
                    SchemaColumn::new("data", Type::Text),
                ],
            )
            .constraint(ConstraintKind::PrimaryKey, ["id"])
            .execute()
            .await
            .map_err(Error::sql)?;
        tracing::debug!(table, "created table");
        created.insert(table.into());
        Ok(())
    }
}

#[async_trait]
impl<Db: 'static + db::Connection> PersistenceStore for SqlStore<Db> {
    type Error = Error;

    async fn insert(&self, table: &str, record: &Record) -> Result<RowId, Self::Error> {
        if !self.tables.contains(table) {
            return Err(Error::UnknownTable {
                table: table.into(),
            });
        }
        self.ensure_table(table).await?;

        let data = serde_json::to_string(record).map_err(|source| Error::Encode {
            table: table.into(),
            source,
        })?;
        let ids = self
            .db
            .insert(table, ["data"])
            .row(vec![data.into()])
            .returning("id")
            .await
            .map_err(Error::sql)?;
        let id = ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::sql(format!("insert into {table} returned no rows")))?;
        RowId::try_from(id).map_err(Error::sql)
    }

    async fn fetch_by_id(&self, table: &str, id: RowId) -> Result<Option<Record>, Self::Error> {
        if !self.tables.contains(table) {
            return Ok(None);
        }
        self.ensure_table(table).await?;

        let Some(row) = self
            .db
            .select(&["data"], table)
            .cmp("id", "=", id)
            .opt()
            .await
            .map_err(Error::sql)? else {
            return Ok(None);
        };
        let data = String::try_from(row.column(0).map_err(Error::sql)?)
            .map_err(|err| Error::decode(table, id, err))?;
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|err| Error::decode(table, id, err))
    }
}
