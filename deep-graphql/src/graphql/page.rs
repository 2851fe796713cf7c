//! Relay-style forward pagination over in-memory collections.
//!
//! A [`PageRequest`] carries the `first` and `after` arguments of a connection field exactly as
//! they were received from the client. [`PageRequest::window`] turns them into a [`Window`] (the
//! range of absolute offsets to return plus the [`PageInfo`] describing it), and
//! [`PageRequest::apply`] slices a collection accordingly, attaching to each [`Edge`] the cursor of
//! its absolute offset. A [`Page`] of GraphQL objects is exposed to clients as a [`Connection`],
//! which reports the [`PageInfo`] computed here even when the page has no edges.

use super::{
    cursor::{self, OffsetCursor},
    OutputType, SimpleObject,
};
use async_graphql::TypeName;
use snafu::Snafu;
use std::borrow::Cow;
use std::ops::Range;

/// Errors in pagination arguments.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("malformed cursor {cursor:?}: {reason}"))]
    MalformedCursor {
        cursor: String,
        reason: &'static str,
    },

    #[snafu(display("invalid argument {name}: {value}"))]
    InvalidArgument { name: &'static str, value: String },
}

/// Relay page metadata.
#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: String,
    pub end_cursor: String,
}

/// The range of offsets selected by a [`PageRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub range: Range<usize>,
    pub page_info: PageInfo,
}

/// A specification of a page to load in a paginated connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageRequest {
    /// Limit the results to the first N items after [`after`](Self::after).
    pub first: Option<i32>,
    /// Start the page at the first item after the one indicated by this cursor.
    pub after: Option<String>,
}

impl PageRequest {
    pub fn new(first: Option<i32>, after: Option<String>) -> Self {
        Self { first, after }
    }

    /// Compute the window of a collection of `len` items selected by this request.
    pub fn window(&self, len: usize) -> Result<Window, Error> {
        // `first` is validated before `after` is decoded.
        let first = self
            .first
            .map(|first| {
                usize::try_from(first).map_err(|_| Error::InvalidArgument {
                    name: "first",
                    value: first.to_string(),
                })
            })
            .transpose()?;
        let after = self.after.as_deref().map(cursor::decode).transpose()?;

        // The reported start may lie past the end of the collection; only the slice is clamped.
        let start = after.map_or(0, |offset| offset.saturating_add(1));
        let end = match first {
            Some(first) => start.saturating_add(first).min(len),
            None => len,
        };

        let has_previous_page = matches!(after, Some(offset) if offset != 0);
        let has_next_page = match first {
            Some(first) => len > start.saturating_add(first).saturating_add(1),
            None => false,
        };
        let last = len.saturating_sub(1);
        let end_offset = match first {
            Some(first) => start.saturating_add(first).saturating_sub(1).min(last),
            None => last,
        };

        Ok(Window {
            range: start.min(len)..end,
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
                start_cursor: cursor::encode(start),
                end_cursor: cursor::encode(end_offset),
            },
        })
    }

    /// Select the page of `items` described by this request.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Result<Page<T>, Error> {
        let Window { range, page_info } = self.window(items.len())?;
        let edges = items[range.clone()]
            .iter()
            .zip(range)
            .map(|(node, offset)| Edge::new(offset.into(), node.clone()))
            .collect();
        Ok(Page { edges, page_info })
    }
}

/// A page of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Transform the node of each edge, keeping its cursor.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            edges: self
                .edges
                .into_iter()
                .map(|edge| Edge::new(edge.cursor, f(edge.node)))
                .collect(),
            page_info: self.page_info,
        }
    }
}

/// An edge in a connection, pointing at a node at a particular offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge<T> {
    cursor: OffsetCursor,
    node: T,
}

impl<T> Edge<T> {
    pub fn new(cursor: OffsetCursor, node: T) -> Self {
        Self { cursor, node }
    }

    /// Get the cursor indicating this edge's position in the connection.
    pub fn cursor(&self) -> &OffsetCursor {
        &self.cursor
    }

    /// Get the object this edge connects to.
    pub fn node(&self) -> &T {
        &self.node
    }

    /// Get the object this edge connects to.
    pub fn into_node(self) -> T {
        self.node
    }
}

/// The GraphQL rendering of a [`Page`], named `<Node>Connection`.
#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
#[graphql(name_type)]
pub struct Connection<T: OutputType> {
    pub page_info: PageInfo,
    pub edges: Vec<ConnectionEdge<T>>,
}

impl<T: OutputType> TypeName for Connection<T> {
    fn type_name() -> Cow<'static, str> {
        format!("{}Connection", <T as OutputType>::type_name()).into()
    }
}

impl<T: OutputType> From<Page<T>> for Connection<T> {
    fn from(page: Page<T>) -> Self {
        Self {
            page_info: page.page_info,
            edges: page.edges.into_iter().map(ConnectionEdge::from).collect(),
        }
    }
}

/// The GraphQL rendering of an [`Edge`], named `<Node>Edge`.
#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
#[graphql(name_type)]
pub struct ConnectionEdge<T: OutputType> {
    pub cursor: String,
    pub node: T,
}

impl<T: OutputType> TypeName for ConnectionEdge<T> {
    fn type_name() -> Cow<'static, str> {
        format!("{}Edge", <T as OutputType>::type_name()).into()
    }
}

impl<T: OutputType> From<Edge<T>> for ConnectionEdge<T> {
    fn from(edge: Edge<T>) -> Self {
        Self {
            cursor: cursor::encode(edge.cursor.offset()),
            node: edge.node,
        }
    }
}
