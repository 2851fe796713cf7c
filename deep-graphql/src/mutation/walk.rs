//! Linearization of input graphs.

use super::Error;
use crate::graphql::input::{InputGraph, NodeId};
use std::collections::{BTreeMap, HashMap};

/// The result of walking an input graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Walk {
    /// Every node reachable from the root, each exactly once.
    ///
    /// A node always appears after all of the nodes nested inside it, so the root comes last.
    pub nodes: Vec<NodeId>,
    /// For each node, the nodes nested inside it, grouped by field name.
    ///
    /// Nodes with no nested nodes have no entry, and neither do fields that hold no nodes. The
    /// nodes under each field are in the order they appear in the field, with nested lists
    /// flattened.
    pub edges: HashMap<NodeId, BTreeMap<String, Vec<NodeId>>>,
}

impl Walk {
    /// The nodes nested inside `node` under `field`.
    pub fn children(&self, node: NodeId, field: &str) -> &[NodeId] {
        self.edges
            .get(&node)
            .and_then(|fields| fields.get(field))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug)]
enum Frame {
    Enter(NodeId),
    Exit(NodeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Entered but not yet exited, i.e. on the path from the root to the current node.
    InProgress,
    Done,
}

/// Walk the graph of nodes reachable from `root`.
///
/// # Errors
///
/// Fails with [`Error::GraphTooLarge`] if more than `limit` distinct nodes are reachable from
/// `root`, and with [`Error::CycleDetected`] if a node is nested inside itself. Nodes which are
/// nested in more than one place without forming a cycle are allowed, and are visited once.
pub fn walk(graph: &InputGraph, root: NodeId, limit: usize) -> Result<Walk, Error> {
    let mut walk = Walk::default();
    let mut states = HashMap::new();
    let mut stack = vec![Frame::Enter(root)];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(id) => {
                match states.get(&id) {
                    // Reached again through a different path, already explored.
                    Some(State::Done) => continue,
                    Some(State::InProgress) => return Err(Error::CycleDetected { node: id }),
                    None => {}
                }
                if states.len() >= limit {
                    return Err(Error::GraphTooLarge { limit });
                }
                let node = graph.get(id).ok_or(Error::UnknownNode { node: id })?;
                states.insert(id, State::InProgress);
                stack.push(Frame::Exit(id));

                let mut fields = BTreeMap::new();
                for (name, value) in node.fields() {
                    let children = value.nodes().collect::<Vec<_>>();
                    if !children.is_empty() {
                        fields.insert(name.to_string(), children);
                    }
                }
                // Push in reverse so that children are explored in field order.
                stack.extend(fields.values().flatten().rev().map(|&child| Frame::Enter(child)));
                if !fields.is_empty() {
                    tracing::debug!(node = id.index(), ?fields, "discovered nested inputs");
                    walk.edges.insert(id, fields);
                }
            }
            Frame::Exit(id) => {
                states.insert(id, State::Done);
                walk.nodes.push(id);
            }
        }
    }

    Ok(walk)
}
