//! Common items that you will always want in scope when using GraphQL.

pub use crate::graphql::{
    async_graphql::{self, value},
    backend::{NodeRegistry, NodeTypeRegistry, PersistenceStore},
    cursor::OffsetCursor,
    input::{InputGraph, InputNode, InputValue, NodeId},
    page::{Connection, Page, PageInfo, PageRequest},
    type_system::{
        Catalog, FieldKind, FieldSpec, Guid, NodeType, Noun, Record, RowId, ScalarType, Value,
    },
    Context, EmptySubscription, InputObject, Object, Schema, SimpleObject, Union, ID,
};
pub use crate::mutation::Resolver;
