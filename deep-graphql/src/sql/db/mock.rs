//! An in-memory [`db`](super) backend.
//!
//! Tables live in a shared map behind an async lock, so clones of a [`Connection`] all see the
//! same data. Constraints are accepted and ignored; serial columns count up from 1 per table.
#![cfg(any(test, feature = "mocks"))]

use super::{ConstraintKind, SchemaColumn, Type, Value, WhereClause};
use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use derive_more::From;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryFutureExt,
};
use itertools::Itertools;
use snafu::Snafu;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, Snafu, From)]
#[snafu(display("in-memory database: {message}"))]
pub struct Error {
    message: String,
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        msg.to_string().into()
    }
}

#[derive(Debug)]
struct Table {
    columns: Vec<SchemaColumn<'static>>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn position(&self, column: &str) -> Result<usize, Error> {
        self.columns
            .iter()
            .position(|col| col.name() == column)
            .ok_or_else(|| format!("no column {column}").into())
    }

    /// Build a full row from values for the columns at `positions`, filling serial columns with
    /// `serial`.
    fn complete(
        &self,
        positions: &[usize],
        values: Vec<Value>,
        serial: i32,
    ) -> Result<Vec<Value>, Error> {
        if values.len() != positions.len() {
            return Err(format!("{} values for {} columns", values.len(), positions.len()).into());
        }
        let mut row = self
            .columns
            .iter()
            .map(|col| (col.ty() == Type::Serial).then_some(Value::Int4(serial)))
            .collect::<Vec<_>>();
        for (&i, value) in positions.iter().zip(values) {
            row[i] = Some(value);
        }
        row.into_iter()
            .zip(&self.columns)
            .map(|(cell, col)| cell.ok_or_else(|| format!("no value for {}", col.name()).into()))
            .collect()
    }

    fn matches(&self, row: &[Value], clause: &WhereClause) -> Result<bool, Error> {
        let cell = &row[self.position(&clause.column)?];
        match &*clause.op {
            "=" => Ok(*cell == clause.param),
            "!=" => Ok(*cell != clause.param),
            op => Err(format!("operator {op} is not supported").into()),
        }
    }
}

/// The serial value of the row at `index`. Serials count from 1 and must fit in an `int4`.
fn serial(index: usize) -> Result<i32, Error> {
    index
        .checked_add(1)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| format!("serial {index} is out of range for int4").into())
}

/// A handle on an in-memory database.
#[derive(Clone, Debug, Default)]
pub struct Connection(Arc<RwLock<HashMap<String, Table>>>);

impl Connection {
    /// A handle on a new, empty database.
    ///
    /// Clone the handle to share the database.
    pub fn create() -> Self {
        Self::default()
    }

    /// The columns of every table created so far.
    pub async fn schema(&self) -> HashMap<String, Vec<SchemaColumn<'static>>> {
        self.0
            .read()
            .await
            .iter()
            .map(|(name, table)| (name.clone(), table.columns.clone()))
            .collect()
    }

    /// How many rows `table` holds, or [`None`] if it was never created.
    pub async fn count(&self, table: &str) -> Option<usize> {
        Some(self.0.read().await.get(table)?.rows.len())
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
            clauses: vec![],
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
}

#[async_trait]
impl<'a> super::CreateTable for CreateTable<'a> {
    type Error = Error;

    fn constraint<I>(self, _kind: ConstraintKind, _columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self
    }

    async fn execute(self) -> Result<(), Self::Error> {
        tracing::info!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            self.columns.iter().join(", ")
        );
        let columns = self.columns;
        self.conn
            .0
            .write()
            .await
            .entry(self.table.into_owned())
            .or_insert_with(|| Table {
                columns: columns.into_iter().map(SchemaColumn::into_static).collect(),
                rows: vec![],
            });
        Ok(())
    }
}

pub struct Select<'a> {
    conn: &'a Connection,
    table: Cow<'a, str>,
    columns: &'a [&'a str],
    clauses: Vec<WhereClause<'a>>,
}

impl<'a> Select<'a> {
    async fn run(self) -> Result<Vec<Row>, Error> {
        tracing::info!(
            "SELECT {} FROM {} WHERE {:?}",
            self.columns.iter().join(", "),
            self.table,
            self.clauses
        );
        let tables = self.conn.0.read().await;
        let table = tables
            .get(&*self.table)
            .ok_or_else(|| Error::from(format!("no table {}", self.table)))?;
        let positions = self
            .columns
            .iter()
            .map(|col| table.position(col))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = vec![];
        for row in &table.rows {
            let keep = self
                .clauses
                .iter()
                .map(|clause| table.matches(row, clause))
                .fold_ok(true, |keep, matches| keep && matches)?;
            if keep {
                rows.push(Row(positions.iter().map(|&i| row[i].clone()).collect()));
            }
        }
        Ok(rows)
    }
}

impl<'a> super::Select<'a> for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Row, Error>>;

    fn filter(mut self, clause: WhereClause<'a>) -> Self {
        self.clauses.push(clause);
        self
    }

    fn stream(self) -> Self::Stream {
        self.run()
            .map_ok(|rows| stream::iter(rows).map(Ok::<_, Error>))
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
        tracing::info!(
            "INSERT INTO {} ({}) VALUES {:?} RETURNING {column}",
            self.table,
            self.columns.iter().join(", "),
            self.rows
        );
        let mut tables = self.conn.0.write().await;
        let table = tables
            .get_mut(&*self.table)
            .ok_or_else(|| Error::from(format!("no table {}", self.table)))?;
        let positions = self
            .columns
            .iter()
            .map(|col| table.position(col))
            .collect::<Result<Vec<_>, _>>()?;
        if !positions.iter().all_unique() {
            return Err(format!("duplicate column in insert into {}", self.table).into());
        }
        let returned = table.position(column)?;

        // Rows are stored only once all of them are complete.
        let next = table.rows.len();
        let rows = self
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| table.complete(&positions, values, serial(next + i)?))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = rows.iter().map(|row| row[returned].clone()).collect();
        table.rows.extend(rows);
        Ok(ids)
    }
}

/// A row of selected cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row(Vec<Value>);

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: usize) -> Result<Value, Self::Error> {
        self.0
            .get(column)
            .cloned()
            .ok_or_else(|| format!("column {column} was not selected").into())
    }
}
