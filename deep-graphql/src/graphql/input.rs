//! Arena-allocated input graphs.
//!
//! A deep mutation receives a tree (or, more generally, a DAG) of input objects. Nodes of the
//! graph are stored in an [`InputGraph`] arena and refer to each other by [`NodeId`], so two
//! fields holding the same [`NodeId`] denote the very same input object, which is created only
//! once.

use super::type_system::{Guid, NodeType, Value};
use derive_more::From;
use std::collections::BTreeMap;

/// The identity of a node in an [`InputGraph`].
///
/// Node IDs are only issued by [`InputGraph::add`], so every ID refers to a node in the graph
/// which issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The position of the node in its arena.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The value of a field of an [`InputNode`].
#[derive(Clone, Debug, PartialEq, Eq, From)]
pub enum InputValue {
    /// A scalar value.
    Value(Value),
    /// A new object to create along with its parent.
    Node(NodeId),
    /// An existing object, referenced by ID.
    Ref(Guid),
    /// A list of values, which may itself contain lists.
    List(Vec<InputValue>),
}

impl From<&str> for InputValue {
    fn from(s: &str) -> Self {
        Self::Value(s.into())
    }
}

impl From<String> for InputValue {
    fn from(s: String) -> Self {
        Self::Value(s.into())
    }
}

impl From<i64> for InputValue {
    fn from(x: i64) -> Self {
        Self::Value(x.into())
    }
}

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        Self::Value(b.into())
    }
}

impl<T: Into<InputValue>> FromIterator<T> for InputValue {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(T::into).collect())
    }
}

impl InputValue {
    /// Visit every leaf of this value, flattening nested lists, in order.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    /// The input nodes referenced by this value, in order.
    pub fn nodes(&self) -> impl '_ + Iterator<Item = NodeId> {
        self.leaves().filter_map(|leaf| match leaf {
            Self::Node(id) => Some(*id),
            _ => None,
        })
    }

    /// The existing objects referenced by this value, in order.
    pub fn refs(&self) -> impl '_ + Iterator<Item = &Guid> {
        self.leaves().filter_map(|leaf| match leaf {
            Self::Ref(guid) => Some(guid),
            _ => None,
        })
    }
}

/// Iterator over the non-list leaves of an [`InputValue`].
#[derive(Clone, Debug)]
pub struct Leaves<'a> {
    stack: Vec<&'a InputValue>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a InputValue;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                InputValue::List(items) => self.stack.extend(items.iter().rev()),
                leaf => return Some(leaf),
            }
        }
    }
}

/// An input object of a known creatable type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputNode {
    ty: &'static NodeType,
    fields: BTreeMap<String, InputValue>,
}

impl InputNode {
    /// An input object of type `ty` with no fields set.
    pub fn new(ty: &'static NodeType) -> Self {
        Self {
            ty,
            fields: Default::default(),
        }
    }

    /// Set a field, builder style.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// The type of this object.
    pub fn ty(&self) -> &'static NodeType {
        self.ty
    }

    /// The value of a field, if it was set.
    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.fields.get(name)
    }

    /// All fields which were set, ordered by name.
    pub fn fields(&self) -> impl '_ + Iterator<Item = (&str, &InputValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// An arena of [`InputNode`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputGraph {
    nodes: Vec<InputNode>,
}

impl InputGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the arena.
    pub fn add(&mut self, node: InputNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Look up a node.
    ///
    /// This returns [`None`] only if `id` was issued by a different graph.
    pub fn get(&self, id: NodeId) -> Option<&InputNode> {
        self.nodes.get(id.0)
    }

    /// Look up a node for modification.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut InputNode> {
        self.nodes.get_mut(id.0)
    }

    /// The number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
