//! The slice of SQL that [`SqlStore`](super::SqlStore) needs, behind a backend-neutral interface.
//!
//! A store only ever creates record tables, inserts rows and reads rows back by key, so that is all
//! a [`Connection`] offers. Statements are built up by chaining methods on the object returned from
//! the connection, then run with a terminal `async` method.

use async_trait::async_trait;
use derive_more::{Display, From};
use futures::{Stream, StreamExt};
use std::borrow::Cow;
use std::fmt::Display;

pub mod mock;
pub mod postgres;

/// Errors reported by a database backend.
pub trait Error: Sized + Send + Sync + 'static + std::error::Error {
    /// An error carrying only a message.
    fn custom(msg: impl Display) -> Self;

    /// A lookup which should have matched at most `limit` rows matched more.
    fn too_many_rows(limit: usize) -> Self {
        Self::custom(format!("expected at most {limit} matching rows"))
    }
}

/// A named, typed column of a table being created.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display(fmt = "{name} {ty}")]
pub struct SchemaColumn<'a> {
    name: Cow<'a, str>,
    ty: Type,
}

impl<'a> SchemaColumn<'a> {
    pub fn new(name: impl Into<Cow<'a, str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn name(&self) -> Cow<'a, str> {
        self.name.clone()
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Take ownership of the column name.
    pub fn into_static(self) -> SchemaColumn<'static> {
        SchemaColumn {
            name: self.name.into_owned().into(),
            ty: self.ty,
        }
    }
}

/// Table-level constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintKind {
    PrimaryKey,
}

/// A handle on a database which can store record tables.
pub trait Connection: Send + Sync {
    type Error: Error;
    type Row: Row<Error = Self::Error>;

    type CreateTable<'a>: CreateTable<Error = Self::Error>
    where
        Self: 'a;

    type Select<'a>: Select<'a, Error = Self::Error, Row = Self::Row>
    where
        Self: 'a;

    type Insert<'a>: Insert<Error = Self::Error>
    where
        Self: 'a;

    /// Begin creating `table` with the given columns, unless it already exists.
    fn create_table<'a>(
        &'a self,
        table: impl Into<Cow<'a, str>> + Send,
        columns: Vec<SchemaColumn<'a>>,
    ) -> Self::CreateTable<'a>;

    /// Begin reading `columns` out of the rows of `table`.
    ///
    /// Without filters every row is returned; see [`Select::filter`] and [`SelectExt::cmp`].
    fn select<'a>(
        &'a self,
        columns: &'a [&'a str],
        table: impl Into<Cow<'a, str>> + Send,
    ) -> Self::Select<'a>;

    /// Begin inserting rows into `table`.
    ///
    /// Every row added to the statement gives one value per entry of `columns`, positionally.
    /// Columns left out (such as serial keys) take their default.
    fn insert<'a, C>(
        &'a self,
        table: impl Into<Cow<'a, str>> + Send,
        columns: impl IntoIterator<Item = C>,
    ) -> Self::Insert<'a>
    where
        C: Into<String>;
}

/// Column types used by record tables.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    #[display(fmt = "text")]
    Text,
    #[display(fmt = "int4")]
    Int4,
    /// An `int4` filled in from a sequence when a row is inserted.
    #[display(fmt = "serial")]
    Serial,
}

/// A single cell.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub enum Value {
    #[display(fmt = "{:?}", _0)]
    Text(String),
    #[display(fmt = "{}", _0)]
    Int4(i32),
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Self::Text(_) => Type::Text,
            Self::Int4(_) => Type::Int4,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

impl TryFrom<Value> for String {
    type Error = String;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Text(s) => Ok(s),
            v => Err(format!("expected a text cell, found {}", v.ty())),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = String;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Int4(x) => Ok(x),
            v => Err(format!("expected an int4 cell, found {}", v.ty())),
        }
    }
}

/// A row filter: `column op param`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WhereClause<'a> {
    pub column: Cow<'a, str>,
    pub op: Cow<'a, str>,
    pub param: Value,
}

/// A pending `CREATE TABLE IF NOT EXISTS`.
#[async_trait]
pub trait CreateTable: Send {
    type Error: Error;

    fn constraint<I>(self, kind: ConstraintKind, columns: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>;

    /// Create the table. Running this against an existing table leaves it untouched.
    async fn execute(self) -> Result<(), Self::Error>;
}

/// A pending `SELECT`.
pub trait Select<'a>: Send {
    type Error: Error;
    type Row: Row<Error = Self::Error>;
    type Stream: Stream<Item = Result<Self::Row, Self::Error>> + Unpin + Send;

    /// Keep only rows matching `clause`. Repeated filters are combined with `AND`.
    fn filter(self, clause: WhereClause<'a>) -> Self;

    fn stream(self) -> Self::Stream;
}

/// Conveniences available on every [`Select`].
#[async_trait]
pub trait SelectExt<'a>: Select<'a> {
    /// Keep only rows where `column op param` holds.
    fn cmp(
        self,
        column: impl Into<Cow<'a, str>> + Send,
        op: impl Into<Cow<'a, str>> + Send,
        param: impl Into<Value> + Send,
    ) -> Self;

    /// Fetch the single matching row, if there is one.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::too_many_rows`] if the filters match more than one row, as well as on
    /// any error reading the rows.
    async fn opt(self) -> Result<Option<Self::Row>, Self::Error>;
}

#[async_trait]
impl<'a, T: Select<'a>> SelectExt<'a> for T {
    fn cmp(
        self,
        column: impl Into<Cow<'a, str>> + Send,
        op: impl Into<Cow<'a, str>> + Send,
        param: impl Into<Value> + Send,
    ) -> Self {
        self.filter(WhereClause {
            column: column.into(),
            op: op.into(),
            param: param.into(),
        })
    }

    async fn opt(self) -> Result<Option<Self::Row>, Self::Error> {
        let mut rows = self.stream();
        let Some(first) = rows.next().await else { return Ok(None); };
        match rows.next().await {
            Some(_) => Err(Self::Error::too_many_rows(1)),
            None => first.map(Some),
        }
    }
}

/// A pending `INSERT ... RETURNING`.
#[async_trait]
pub trait Insert: Send {
    type Error: Error;

    /// Queue one row, positionally matching the statement's columns.
    fn row(self, values: Vec<Value>) -> Self;

    /// Insert the queued rows and report the value each one received for `column`.
    async fn returning(self, column: &str) -> Result<Vec<Value>, Self::Error>;
}

/// A row read back from a table.
pub trait Row: Sized + Send {
    type Error: Error;

    /// The cell at position `column` of the `SELECT` list.
    fn column(&self, column: usize) -> Result<Value, Self::Error>;
}

/// Quote `ident` so it can be spliced into a statement as a table or column name.
pub fn escape_ident(ident: impl AsRef<str>) -> String {
    let ident = ident.as_ref();
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_escape_ident() {
        assert_eq!(escape_ident("children"), "\"children\"");
        assert_eq!(escape_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(String::try_from(Value::from("x")), Ok("x".to_string()));
        assert_eq!(i32::try_from(Value::from(3)), Ok(3));
        assert!(i32::try_from(Value::from("3")).is_err());
        assert_eq!(Value::from("x").to_string(), "\"x\"");
        assert_eq!(SchemaColumn::new("id", Type::Serial).to_string(), "id serial");
    }
}
