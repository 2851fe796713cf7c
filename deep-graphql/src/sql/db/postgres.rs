//! A PostgreSQL [`db`](super) backend on top of [`async-postgres`].
//!
//! Every statement is sent with its values as bind parameters and logged at `info` level before it
//! runs.
#![cfg(feature = "postgres")]

use super::{escape_ident, ConstraintKind, SchemaColumn, Value, WhereClause};
use async_std::task::spawn;
use async_trait::async_trait;
use bytes::BytesMut;
use derive_more::From;
use futures::{stream::BoxStream, StreamExt, TryFutureExt, TryStreamExt};
use itertools::Itertools;
use snafu::Snafu;
use std::borrow::Cow;
use std::fmt::{Debug, Display};
use tokio_postgres::types::{accepts, to_sql_checked, FromSql, IsNull, ToSql, Type};

pub use async_postgres::{Config, Row};

#[derive(Debug, Snafu, From)]
pub enum Error {
    #[from]
    #[snafu(display("postgres: {source}"))]
    Sql { source: async_postgres::Error },

    #[snafu(display("cannot reach postgres: {source}"))]
    Connect { source: std::io::Error },

    #[snafu(display("column type {ty} cannot hold a record cell"))]
    UnsupportedType { ty: Type },

    #[snafu(display("{message}"))]
    Custom { message: String },
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self::Custom {
            message: msg.to_string(),
        }
    }
}

/// An open PostgreSQL session.
pub struct Connection(tokio_postgres::Client);

impl Connection {
    /// Connect using `config`.
    ///
    /// The connection task is spawned onto the `async-std` executor and lives until the returned
    /// handle is dropped.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let (client, task) = async_postgres::connect(config)
            .await
            .map_err(|source| Error::Connect { source })?;
        spawn(task);
        Ok(Self(client))
    }

    async fn run<'a, P>(
        &self,
        statement: String,
        params: P,
    ) -> Result<BoxStream<'static, Result<Row, Error>>, Error>
    where
        P: Debug + IntoIterator<Item = &'a Value>,
        P::IntoIter: ExactSizeIterator,
    {
        tracing::info!(?params, "{statement}");
        let rows = self
            .0
            .query_raw(
                statement.as_str(),
                params.into_iter().map(|value| value as &dyn ToSql),
            )
            .await?;
        Ok(rows.map_err(Error::from).boxed())
    }
}

impl super::Connection for Connection {
    type Error = Error;
    type Row = Row;
    type CreateTable<'a> = CreateTable<'a>;
    type Select<'a> = Select<'a>;
    type Insert<'a> = Insert<'a>;

    fn create_table<'a>(
        &'a self,
        table: impl Into<Cow<'a, str>> + Send,
        columns: Vec<SchemaColumn<'a>>,
    ) -> Self::CreateTable<'a> {
        CreateTable {
            conn: self,
            table: table.into(),
            columns,
            constraints: vec![],
        }
    }

    fn select<'a>(
        &'a self,
        columns: &'a [&'a str],
        table: impl Into<Cow<'a, str>> + Send,
    ) -> Self::Select<'a> {
        Select {
            conn: self,
            table: table.into(),
            columns,
            conditions: vec![],
            params: vec![],
        }
    }

    fn insert<'a, C>(
        &'a self,
        table: impl Into<Cow<'a, str>> + Send,
        columns: impl IntoIterator<Item = C>,
    ) -> Self::Insert<'a>
    where
        C: Into<String>,
    {
        Insert {
            conn: self,
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }
}

pub struct CreateTable<'a> {
    conn: &'a Connection,
    table: Cow<'a, str>,
    columns: Vec<SchemaColumn<'a>>,
    constraints: Vec<String>,
}

#[async_trait]
impl<'a> super::CreateTable for CreateTable<'a> {
    type Error = Error;

    fn constraint<I>(mut self, kind: ConstraintKind, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect::<Vec<String>>();
        let (tag, clause) = match kind {
            ConstraintKind::PrimaryKey => ("pk", "PRIMARY KEY"),
        };
        let name = escape_ident(format!("{}-{tag}-{}", self.table, columns.join("-")));
        self.constraints.push(format!(
            "CONSTRAINT {name} {clause} ({})",
            columns.iter().map(escape_ident).join(", ")
        ));
        self
    }

    async fn execute(self) -> Result<(), Self::Error> {
        let definitions = self
            .columns
            .iter()
            .map(|col| format!("{} {}", escape_ident(col.name()), col.ty()))
            .chain(self.constraints)
            .join(", ");
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} ({definitions})",
            escape_ident(&self.table)
        );
        // Execution errors arrive on the row stream, so it has to be drained.
        self.conn
            .run(statement, [])
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }
}

pub struct Select<'a> {
    conn: &'a Connection,
    table: Cow<'a, str>,
    columns: &'a [&'a str],
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl<'a> super::Select<'a> for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Row, Error>>;

    fn filter(mut self, clause: WhereClause<'a>) -> Self {
        // Bind parameters are numbered from 1.
        self.params.push(clause.param);
        self.conditions.push(format!(
            "{} {} ${}",
            escape_ident(&clause.column),
            clause.op,
            self.params.len()
        ));
        self
    }

    fn stream(self) -> Self::Stream {
        async move {
            let mut statement = format!(
                "SELECT {} FROM {}",
                self.columns.iter().map(escape_ident).join(", "),
                escape_ident(&self.table)
            );
            if !self.conditions.is_empty() {
                statement += &format!(" WHERE {}", self.conditions.join(" AND "));
            }
            self.conn.run(statement, &self.params).await
        }
        .try_flatten_stream()
        .boxed()
    }
}

pub struct Insert<'a> {
    conn: &'a Connection,
    table: Cow<'a, str>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[async_trait]
impl<'a> super::Insert for Insert<'a> {
    type Error = Error;

    fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    async fn returning(self, column: &str) -> Result<Vec<Value>, Error> {
        let width = self.columns.len();
        if let Some(row) = self.rows.iter().find(|row| row.len() != width) {
            return Err(super::Error::custom(format!(
                "{} values for {width} columns of {}",
                row.len(),
                self.table
            )));
        }

        let tuples = (0..self.rows.len())
            .map(|i| format!("({})", (1..=width).map(|j| format!("${}", i * width + j)).join(", ")))
            .join(", ");
        let statement = format!(
            "INSERT INTO {} ({}) VALUES {tuples} RETURNING {}",
            escape_ident(&self.table),
            self.columns.iter().map(escape_ident).join(", "),
            escape_ident(column)
        );
        let params = self.rows.into_iter().flatten().collect::<Vec<_>>();
        self.conn
            .run(statement, &params)
            .await?
            .map(|row| Ok::<Value, Error>(row?.try_get(0)?))
            .try_collect()
            .await
    }
}

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: usize) -> Result<Value, Self::Error> {
        Ok(self.try_get(column)?)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync + 'static>> {
        match self {
            Self::Text(s) => s.to_sql(ty, out),
            Self::Int4(n) => n.to_sql(ty, out),
        }
    }

    accepts!(INT4, TEXT);
    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        if *ty == Type::TEXT {
            Ok(String::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT4 {
            Ok(i32::from_sql(ty, raw)?.into())
        } else {
            Err(Error::UnsupportedType { ty: ty.clone() }.into())
        }
    }

    accepts!(INT4, TEXT);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        graphql::{
            backend::PersistenceStore,
            input::{InputGraph, InputNode, InputValue},
            type_system::{test_types::*, Guid, Record},
        },
        init_logging,
        mutation::Resolver,
        sql::{
            db::{Connection as _, CreateTable as _, Type as ColumnType},
            PostgresStore,
        },
    };
    use rand::RngCore;
    use std::env;
    use std::process::Command;

    /// A scratch database, dropped again at the end of the test.
    struct ScratchDb {
        name: String,
        port: u16,
        password: String,
    }

    /// Run one of the PostgreSQL admin tools against the test server.
    fn admin(tool: &str, db: &str, port: u16, password: &str) -> Result<(), String> {
        let output = Command::new(tool)
            .args(["-h", "127.0.0.1", "-p", &port.to_string(), "-U", "postgres", db])
            .env("PGPASSWORD", password)
            .output()
            .map_err(|err| err.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }

    impl ScratchDb {
        /// Create a scratch database, or [`None`] if PostgreSQL tests are disabled.
        fn create() -> Option<Self> {
            if env::var("POSTGRES_TESTS").is_err() {
                tracing::warn!("POSTGRES_TESTS is not set, skipping");
                return None;
            }
            let port = env::var("POSTGRES_TESTS_PORT").map_or(5432, |port| port.parse().unwrap());
            let password =
                env::var("POSTGRES_TESTS_PASSWORD").unwrap_or_else(|_| "password".into());
            let name = format!("deep_graphql_{}", rand::thread_rng().next_u64());

            tracing::info!(port, "creating scratch database {name}");
            if let Err(err) = admin("createdb", &name, port, &password) {
                panic!("createdb {name}: {err}");
            }
            Some(Self {
                name,
                port,
                password,
            })
        }

        async fn store(&self) -> PostgresStore {
            let mut config = Config::default();
            config
                .host("localhost")
                .port(self.port)
                .user("postgres")
                .password(&self.password)
                .dbname(&self.name);
            let conn = Connection::new(config).await.unwrap();
            PostgresStore::for_catalog(conn, &catalog())
        }
    }

    impl Drop for ScratchDb {
        fn drop(&mut self) {
            tracing::info!("dropping scratch database {}", self.name);
            if let Err(err) = admin("dropdb", &self.name, self.port, &self.password) {
                tracing::error!("dropdb {}: {err}", self.name);
            }
        }
    }

    macro_rules! scratch_db {
        () => {
            match ScratchDb::create() {
                Some(db) => db,
                None => return,
            }
        };
    }

    #[async_std::test]
    async fn test_postgres_store() {
        init_logging();
        let db = scratch_db!();
        let store = db.store().await;

        let record = Record::new().with("name", "Joanne");
        let id = store.insert("children", &record).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            store.fetch_by_id("children", id).await.unwrap(),
            Some(record)
        );
        assert_eq!(store.fetch_by_id("children", 2).await.unwrap(), None);
        assert_eq!(store.fetch_by_id("parents", 1).await.unwrap(), None);
    }

    #[async_std::test]
    async fn test_postgres_create_table_errors() {
        init_logging();
        let db = scratch_db!();
        let store = db.store().await;
        let conn = store.inner();

        let columns = || vec![SchemaColumn::new("id", ColumnType::Serial)];
        conn.create_table("things", columns())
            .constraint(ConstraintKind::PrimaryKey, ["id"])
            .execute()
            .await
            .unwrap();
        conn.create_table("things", columns())
            .execute()
            .await
            .unwrap();

        // The missing key column is only noticed once the statement executes.
        assert!(conn
            .create_table("broken", columns())
            .constraint(ConstraintKind::PrimaryKey, ["missing"])
            .execute()
            .await
            .is_err());
    }

    #[async_std::test]
    async fn test_postgres_deep_mutation() {
        init_logging();
        let db = scratch_db!();
        let store = db.store().await;
        let existing = store
            .insert("children", &Record::new().with("name", "Suzy"))
            .await
            .unwrap();

        let mut graph = InputGraph::new();
        let child = graph.add(InputNode::new(&CHILD).field("name", "Joanne"));
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", [child].into_iter().collect::<InputValue>())
                .field("child_ids", Guid::new("children", existing)),
        );
        let guid = Resolver::new(catalog())
            .resolve(&graph, root, &store)
            .await
            .unwrap();
        assert_eq!(guid, Guid::new("parents", 1));

        let parent = store.fetch_by_id("parents", 1).await.unwrap().unwrap();
        assert_eq!(
            parent.ids("child_ids"),
            [Guid::new("children", 2), Guid::new("children", existing)]
        );
    }
}
