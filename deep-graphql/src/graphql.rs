//! A general interface for defining deep-mutation GraphQL applications.

pub mod backend;
pub mod cursor;
pub mod input;
pub mod page;
pub mod type_system;

// Re-export commonly used `async_graphql` types.
pub use async_graphql::{
    connection, value, Context, EmptyMutation, EmptySubscription, InputObject, Object,
    OutputType, Result, Schema, SimpleObject, Union, ID,
};

// Re-export `async_graphql` directly as an escape hatch.
pub extern crate async_graphql;
