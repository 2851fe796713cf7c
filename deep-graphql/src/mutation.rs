//! Deep mutations.
//!
//! A deep mutation creates an object together with any number of new objects it links to,
//! arbitrarily deeply nested, in a single request. The input is an [`InputGraph`] whose nodes may
//! link to each other in two ways:
//! * through a _nested_ field (e.g. `children`), holding new input objects to create;
//! * through a _foreign key_ field (e.g. `child_ids`), holding the [`Guid`]s of objects that
//!   already exist.
//!
//! The [`Resolver`] first [walks](walk) the graph to linearize it so that every object comes after
//! all the objects it depends on. It then persists each object in that order, rewriting nested
//! fields into foreign keys holding the IDs that were just minted for the nested objects.
//!
//! Mutations are not atomic. If persisting an object fails, objects which were already persisted
//! remain in the store. The resolver logs their IDs when this happens.

use crate::config::Config;
use crate::graphql::{
    input::NodeId,
    type_system::{Catalog, Guid, ValidationError},
};
use snafu::Snafu;
use std::fmt::Display;

mod resolve;
pub mod walk;

pub use walk::{walk, Walk};

/// Errors encountered while resolving a deep mutation.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("input graph has more than {limit} nodes"))]
    GraphTooLarge { limit: usize },

    #[snafu(display("input object {} is nested inside itself", node.index()))]
    CycleDetected { node: NodeId },

    #[snafu(display("{ty} requires either {field} or {nested}"))]
    MissingRequiredLink {
        ty: &'static str,
        field: &'static str,
        nested: &'static str,
    },

    #[snafu(display("invalid {ty}: {source}"))]
    Validation {
        ty: &'static str,
        source: ValidationError,
    },

    #[snafu(display("{guid} does not refer to an existing object in {expected}"))]
    DanglingReference { guid: Guid, expected: &'static str },

    #[snafu(display("input object {} does not belong to this graph", node.index()))]
    UnknownNode { node: NodeId },

    #[snafu(display("input type {ty} is not registered"))]
    UnknownType { ty: &'static str },

    #[snafu(display("store error: {message}"))]
    Store { message: String },
}

impl Error {
    /// Wrap an error reported by the persistence store.
    pub fn store(err: impl Display) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

/// Resolves deep mutations against a fixed set of node types.
#[derive(Clone, Debug)]
pub struct Resolver {
    catalog: Catalog,
    config: Config,
}

impl Resolver {
    /// A resolver with the default configuration.
    pub fn new(catalog: Catalog) -> Self {
        Self::with_config(catalog, Config::default())
    }

    pub fn with_config(catalog: Catalog, config: Config) -> Self {
        Self { catalog, config }
    }

    /// The node types this resolver can create.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
