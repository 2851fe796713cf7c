//! Type system for a deep-mutation GraphQL API.
//!
//! Every entity in the application's data model is described by a statically declared
//! [`NodeType`]. A node type names the GraphQL input type it corresponds to, the [`Noun`] used to
//! derive its table name, and a list of [`FieldSpec`]s. Fields are either scalars, stored directly
//! in the persisted [`Record`], or _links_ to other node types, stored as foreign keys holding
//! opaque [`Guid`]s.
//!
//! A link field has two names:
//! * the _foreign key_ name (e.g. `child_ids`), under which the persisted record stores the
//!   [`Guid`]s of the linked records, and under which a client can pass the IDs of records that
//!   already exist;
//! * the _nested_ name (e.g. `children`), under which a client can pass brand new input objects
//!   which will be created along with the object that links to them.
//!
//! Both names are declared explicitly, rather than derived from the type name at runtime, and a
//! [`Catalog`] checks once, when it is built, that they follow the naming convention: the foreign
//! key is `<singular>_ids` (or `<singular>_id` for a singular link) and the nested field is the
//! target's plural (or singular) noun.

use derive_more::{Deref, DerefMut, Display, From, Into};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::{BTreeMap, HashMap};
use std::slice;
use std::str::FromStr;

/// The type of auto-generated row IDs.
pub type RowId = i32;

/// An opaque, globally unique identifier of a persisted record.
///
/// A GUID has the form `<table>:<row>`, where `table` is the name of the table the record was
/// inserted into and `row` is the ID the store generated for it.
#[derive(Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "{table}:{row}")]
#[serde(try_from = "String", into = "String")]
pub struct Guid {
    table: String,
    row: RowId,
}

impl Guid {
    /// The GUID of row `row` in `table`.
    pub fn new(table: impl Into<String>, row: RowId) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }

    /// The table this GUID was minted in.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The row ID within [`table`](Self::table).
    pub fn row(&self) -> RowId {
        self.row
    }
}

/// A string that does not have the form `<table>:<row>`.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
#[snafu(display("malformed ID {id:?}: {reason}"))]
pub struct MalformedId {
    id: String,
    reason: &'static str,
}

impl FromStr for Guid {
    type Err = MalformedId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason| MalformedId {
            id: s.to_string(),
            reason,
        };
        let (table, row) = s
            .split_once(':')
            .ok_or_else(|| malformed("expected <table>:<row>"))?;
        if table.is_empty() {
            return Err(malformed("empty table name"));
        }
        let row = row
            .parse()
            .map_err(|_| malformed("row ID is not an integer"))?;
        Ok(Self::new(table, row))
    }
}

impl TryFrom<String> for Guid {
    type Error = MalformedId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Guid> for String {
    fn from(guid: Guid) -> Self {
        guid.to_string()
    }
}

/// A value stored in a field of a [`Record`].
#[derive(Clone, Debug, PartialEq, Eq, From, Serialize, Deserialize)]
pub enum Value {
    /// A text string.
    Text(String),
    /// A signed integer.
    Int(i64),
    /// A boolean.
    Bool(bool),
    /// A singular link to another record.
    Id(Guid),
    /// A list of links to other records.
    Ids(Vec<Guid>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl Value {
    /// A short description of the kind of this value, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Id(_) => "id",
            Self::Ids(_) => "ids",
        }
    }
}

/// The type of a scalar field.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    #[display(fmt = "text")]
    Text,
    #[display(fmt = "int")]
    Int,
    #[display(fmt = "bool")]
    Bool,
}

impl ScalarType {
    /// Does `value` have this type?
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Text, Value::Text(_)) | (Self::Int, Value::Int(_)) | (Self::Bool, Value::Bool(_))
        )
    }
}

/// A persisted object: a mapping from field names to values.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Deref, DerefMut, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`, builder style.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// The value of a text field, if it is present and is text.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.0.get(field)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value of an integer field, if it is present and is an integer.
    pub fn int(&self, field: &str) -> Option<i64> {
        match self.0.get(field)? {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }

    /// The GUIDs stored in a link field.
    ///
    /// Both singular and list links are supported. Missing fields and fields that are not links
    /// are treated as empty.
    pub fn ids(&self, field: &str) -> &[Guid] {
        match self.0.get(field) {
            Some(Value::Id(guid)) => slice::from_ref(guid),
            Some(Value::Ids(guids)) => guids,
            _ => &[],
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The singular and plural forms of the noun naming a node type.
///
/// The plural doubles as the table name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Noun {
    pub singular: &'static str,
    pub plural: &'static str,
}

impl Noun {
    pub const fn new(singular: &'static str, plural: &'static str) -> Self {
        Self { singular, plural }
    }
}

/// The kind of data stored in a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    /// A scalar value.
    Scalar { ty: ScalarType, required: bool },
    /// A link to exactly one record in the `target` table.
    Link {
        target: &'static str,
        nested: &'static str,
    },
    /// A list of links to records in the `target` table.
    Links {
        target: &'static str,
        nested: &'static str,
        /// The minimum number of links.
        min: usize,
    },
}

/// The declaration of a field of a [`NodeType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSpec {
    /// The name of the field in the persisted record.
    ///
    /// For links, this is the foreign key name.
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    /// A required scalar field.
    pub const fn scalar(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar { ty, required: true },
        }
    }

    /// An optional scalar field.
    pub const fn optional(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar {
                ty,
                required: false,
            },
        }
    }

    /// A link to exactly one record of `target`, which can be created via `nested`.
    pub const fn link(name: &'static str, nested: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Link { target, nested },
        }
    }

    /// A list of at least `min` links to records of `target`, which can be created via `nested`.
    pub const fn links(
        name: &'static str,
        nested: &'static str,
        target: &'static str,
        min: usize,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Links {
                target,
                nested,
                min,
            },
        }
    }

    /// The table this field links to, if it is a link.
    pub fn target(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Link { target, .. } | FieldKind::Links { target, .. } => Some(target),
            FieldKind::Scalar { .. } => None,
        }
    }

    /// The name of the input field used to create new linked objects, if this is a link.
    pub fn nested(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Link { nested, .. } | FieldKind::Links { nested, .. } => Some(nested),
            FieldKind::Scalar { .. } => None,
        }
    }

    /// Must an input supply at least one link for this field?
    pub fn requires_link(&self) -> bool {
        match self.kind {
            FieldKind::Link { .. } => true,
            FieldKind::Links { min, .. } => min > 0,
            FieldKind::Scalar { .. } => false,
        }
    }
}

/// A statically declared type of creatable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeType {
    /// The name of the GraphQL input type, e.g. `ParentInput`.
    pub name: &'static str,
    pub noun: Noun,
    pub fields: &'static [FieldSpec],
}

impl NodeType {
    /// The table objects of this type are stored in.
    pub fn table(&self) -> &'static str {
        self.noun.plural
    }

    /// Look up a field by its record name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Look up the link field which can be created through the nested input field `nested`.
    pub fn link_for_nested(&self, nested: &str) -> Option<&'static FieldSpec> {
        self.fields
            .iter()
            .find(|field| field.nested() == Some(nested))
    }

    /// The link fields of this type.
    pub fn links(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|field| field.target().is_some())
    }

    /// Check that a fully merged record has the shape this type declares.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        if let Some(field) = record.keys().find(|name| self.field(name).is_none()) {
            return Err(ValidationError::UnexpectedField {
                field: field.clone(),
            });
        }

        for field in self.fields {
            let value = record.get(field.name);
            match (field.kind, value) {
                (FieldKind::Scalar { required, .. }, None) => {
                    if required {
                        return Err(ValidationError::MissingField { field: field.name });
                    }
                }
                (FieldKind::Scalar { ty, .. }, Some(value)) => {
                    if !ty.matches(value) {
                        return Err(ValidationError::TypeMismatch {
                            field: field.name,
                            expected: ty.to_string(),
                            found: value.kind(),
                        });
                    }
                }
                (FieldKind::Link { .. }, Some(Value::Id(_))) => {}
                (FieldKind::Link { .. }, Some(Value::Ids(ids))) if ids.len() == 1 => {}
                (FieldKind::Link { .. }, Some(Value::Ids(ids))) => {
                    return Err(ValidationError::WrongLinkCount {
                        field: field.name,
                        found: ids.len(),
                    });
                }
                (FieldKind::Link { .. }, None) => {
                    return Err(ValidationError::WrongLinkCount {
                        field: field.name,
                        found: 0,
                    });
                }
                (FieldKind::Links { min, .. }, Some(Value::Ids(ids))) => {
                    if ids.len() < min {
                        return Err(ValidationError::TooFewLinks {
                            field: field.name,
                            min,
                            found: ids.len(),
                        });
                    }
                }
                (FieldKind::Links { min, .. }, None) => {
                    if min > 0 {
                        return Err(ValidationError::TooFewLinks {
                            field: field.name,
                            min,
                            found: 0,
                        });
                    }
                }
                (FieldKind::Link { .. }, Some(value)) => {
                    return Err(ValidationError::TypeMismatch {
                        field: field.name,
                        expected: "id".into(),
                        found: value.kind(),
                    });
                }
                (FieldKind::Links { .. }, Some(value)) => {
                    return Err(ValidationError::TypeMismatch {
                        field: field.name,
                        expected: "ids".into(),
                        found: value.kind(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A record that does not have the shape declared by its [`NodeType`].
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum ValidationError {
    #[snafu(display("missing required field {field}"))]
    MissingField { field: &'static str },

    #[snafu(display("unexpected field {field}"))]
    UnexpectedField { field: String },

    #[snafu(display("type mismatch for field {field} (expected {expected}, got {found})"))]
    TypeMismatch {
        field: &'static str,
        expected: String,
        found: &'static str,
    },

    #[snafu(display("field {field} requires at least {min} links, got {found}"))]
    TooFewLinks {
        field: &'static str,
        min: usize,
        found: usize,
    },

    #[snafu(display("field {field} requires exactly one link, got {found}"))]
    WrongLinkCount { field: &'static str, found: usize },
}

/// Errors in the declaration of a set of node types.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum CatalogError {
    #[snafu(display("node type {name} is registered twice"))]
    DuplicateType { name: &'static str },

    #[snafu(display("table {table} is registered twice"))]
    DuplicateTable { table: &'static str },

    #[snafu(display("{ty}.{field} links to unregistered table {target}"))]
    UnknownTarget {
        ty: &'static str,
        field: &'static str,
        target: &'static str,
    },

    #[snafu(display("foreign key {ty}.{field} should be named {expected}"))]
    ForeignKeyName {
        ty: &'static str,
        field: &'static str,
        expected: String,
    },

    #[snafu(display("nested field for {ty}.{field} should be named {expected}, not {found}"))]
    NestedName {
        ty: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// The fixed set of node types an application can create.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    types: Vec<&'static NodeType>,
    by_name: HashMap<&'static str, usize>,
    by_table: HashMap<&'static str, usize>,
}

impl Catalog {
    /// Build a catalog from a list of node types and check that their links are consistent.
    pub fn build<I>(types: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = &'static NodeType>,
    {
        let mut catalog = Self::default();
        for ty in types {
            catalog.register(ty)?;
        }
        catalog.check()?;
        Ok(catalog)
    }

    fn register(&mut self, ty: &'static NodeType) -> Result<(), CatalogError> {
        if self.by_name.contains_key(ty.name) {
            return Err(CatalogError::DuplicateType { name: ty.name });
        }
        if self.by_table.contains_key(ty.table()) {
            return Err(CatalogError::DuplicateTable { table: ty.table() });
        }
        let index = self.types.len();
        self.types.push(ty);
        self.by_name.insert(ty.name, index);
        self.by_table.insert(ty.table(), index);
        Ok(())
    }

    /// Check that every link targets a registered table and follows the naming convention.
    fn check(&self) -> Result<(), CatalogError> {
        for ty in &self.types {
            for field in ty.links() {
                let (target, nested) = match (field.target(), field.nested()) {
                    (Some(target), Some(nested)) => (target, nested),
                    _ => continue,
                };
                let target_ty = self
                    .by_table(target)
                    .ok_or(CatalogError::UnknownTarget {
                        ty: ty.name,
                        field: field.name,
                        target,
                    })?;

                let (expected_key, expected_nested) = match field.kind {
                    FieldKind::Link { .. } => (
                        format!("{}_id", target_ty.noun.singular),
                        target_ty.noun.singular,
                    ),
                    _ => (
                        format!("{}_ids", target_ty.noun.singular),
                        target_ty.noun.plural,
                    ),
                };
                if field.name != expected_key {
                    return Err(CatalogError::ForeignKeyName {
                        ty: ty.name,
                        field: field.name,
                        expected: expected_key,
                    });
                }
                if nested != expected_nested {
                    return Err(CatalogError::NestedName {
                        ty: ty.name,
                        field: field.name,
                        expected: expected_nested,
                        found: nested,
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a node type by its GraphQL input type name.
    pub fn by_name(&self, name: &str) -> Option<&'static NodeType> {
        self.by_name.get(name).map(|&i| self.types[i])
    }

    /// Look up a node type by its table name.
    pub fn by_table(&self, table: &str) -> Option<&'static NodeType> {
        self.by_table.get(table).map(|&i| self.types[i])
    }

    /// Is `ty` one of the registered node types?
    pub fn contains(&self, ty: &NodeType) -> bool {
        self.by_name(ty.name) == Some(ty)
    }

    /// The names of all registered tables.
    pub fn tables(&self) -> impl '_ + Iterator<Item = &'static str> {
        self.types.iter().map(|ty| ty.table())
    }
}
