//! Bottom-up persistence of input graphs.

use super::{walk, Error, Resolver, Walk};
use crate::graphql::{
    backend::PersistenceStore,
    input::{InputGraph, InputNode, InputValue, NodeId},
    type_system::{FieldKind, Guid, NodeType, Record, ValidationError, Value},
};
use futures::future::try_join_all;
use std::collections::HashMap;

impl Resolver {
    /// Create the object described by `root` and every new object nested inside it.
    ///
    /// Returns the ID of the root object.
    ///
    /// # Errors
    ///
    /// Structural problems with the input (too many objects, cycles, missing required links,
    /// fields which are not declared or hold the wrong kind of input) are detected before anything
    /// is written. Invalid records and dangling references are detected just before the offending
    /// object would be inserted; objects inserted before that point are not removed.
    pub async fn resolve<S>(
        &self,
        graph: &InputGraph,
        root: NodeId,
        store: &S,
    ) -> Result<Guid, Error>
    where
        S: PersistenceStore + ?Sized,
    {
        self.check_node(graph, root)?;
        let walk = walk(graph, root, self.config.node_limit)?;
        for &id in &walk.nodes {
            self.check_node(graph, id)?;
        }

        let mut guids = HashMap::new();
        for &id in &walk.nodes {
            match self.persist(graph, &walk, &guids, id, store).await {
                Ok(guid) => {
                    guids.insert(id, guid);
                }
                Err(err) => {
                    if !guids.is_empty() {
                        let orphans = guids.values().map(Guid::to_string).collect::<Vec<_>>();
                        tracing::warn!(
                            ?orphans,
                            "deep mutation failed after some objects were persisted: {err}"
                        );
                    }
                    return Err(err);
                }
            }
        }

        guids.remove(&root).ok_or(Error::UnknownNode { node: root })
    }

    fn node_type(&self, node: &InputNode) -> Result<&'static NodeType, Error> {
        let ty = node.ty();
        if self.catalog.contains(ty) {
            Ok(ty)
        } else {
            Err(Error::UnknownType { ty: ty.name })
        }
    }

    /// Check the parts of a node which can be checked without knowing the IDs of its children.
    fn check_node(&self, graph: &InputGraph, id: NodeId) -> Result<(), Error> {
        let node = graph.get(id).ok_or(Error::UnknownNode { node: id })?;
        let ty = self.node_type(node)?;

        for field in ty.links().filter(|field| field.requires_link()) {
            let nested = field.nested().unwrap_or_default();
            if node.get(field.name).is_none() && node.get(nested).is_none() {
                return Err(Error::MissingRequiredLink {
                    ty: ty.name,
                    field: field.name,
                    nested,
                });
            }
        }

        for (name, value) in node.fields() {
            let invalid = |source| Error::Validation {
                ty: ty.name,
                source,
            };
            if let Some(field) = ty.link_for_nested(name) {
                // A nested field may only hold new objects.
                if let Some(leaf) = value
                    .leaves()
                    .find(|leaf| !matches!(leaf, InputValue::Node(_)))
                {
                    return Err(invalid(mismatch(field.nested(), "input object", leaf)));
                }
            } else if let Some(field) = ty.field(name) {
                match field.kind {
                    FieldKind::Scalar { .. } => {
                        if !matches!(value, InputValue::Value(_)) {
                            return Err(invalid(mismatch(Some(field.name), "scalar", value)));
                        }
                    }
                    FieldKind::Link { .. } | FieldKind::Links { .. } => {
                        // A foreign key may only hold IDs of existing objects.
                        if let Some(leaf) = value
                            .leaves()
                            .find(|leaf| !matches!(leaf, InputValue::Ref(_)))
                        {
                            return Err(invalid(mismatch(Some(field.name), "id", leaf)));
                        }
                    }
                }
            } else {
                return Err(invalid(ValidationError::UnexpectedField {
                    field: name.to_string(),
                }));
            }
        }

        Ok(())
    }

    /// Merge the IDs of a node's children into its foreign keys and insert it.
    async fn persist<S>(
        &self,
        graph: &InputGraph,
        walk: &Walk,
        guids: &HashMap<NodeId, Guid>,
        id: NodeId,
        store: &S,
    ) -> Result<Guid, Error>
    where
        S: PersistenceStore + ?Sized,
    {
        let node = graph.get(id).ok_or(Error::UnknownNode { node: id })?;
        let ty = self.node_type(node)?;

        let mut record = Record::new();
        for (name, value) in node.fields() {
            if let InputValue::Value(value) = value {
                record.insert(name.to_string(), value.clone());
            }
        }
        for field in ty.links() {
            let nested = field.nested().unwrap_or_default();
            let refs = node.get(field.name);
            if refs.is_none() && node.get(nested).is_none() {
                continue;
            }

            // New children first, then the existing objects the caller linked explicitly.
            let mut ids = walk
                .children(id, nested)
                .iter()
                .map(|child| guids.get(child).cloned().ok_or(Error::UnknownNode { node: *child }))
                .collect::<Result<Vec<_>, _>>()?;
            ids.extend(refs.into_iter().flat_map(InputValue::refs).cloned());

            let value = match field.kind {
                FieldKind::Link { .. } if ids.len() == 1 => Value::Id(ids.remove(0)),
                _ => Value::Ids(ids),
            };
            record.insert(field.name.to_string(), value);
        }

        ty.validate(&record).map_err(|source| Error::Validation {
            ty: ty.name,
            source,
        })?;
        self.check_references(ty, &record, store).await?;

        let row = store
            .insert(ty.table(), &record)
            .await
            .map_err(Error::store)?;
        let guid = Guid::new(ty.table(), row);
        tracing::debug!(%guid, node = id.index(), "persisted {}", ty.name);
        Ok(guid)
    }

    /// Check that every foreign key in `record` refers to an existing object of the right type.
    async fn check_references<S>(
        &self,
        ty: &NodeType,
        record: &Record,
        store: &S,
    ) -> Result<(), Error>
    where
        S: PersistenceStore + ?Sized,
    {
        let checks = ty.links().flat_map(|field| {
            let target = field.target().unwrap_or_default();
            record
                .ids(field.name)
                .iter()
                .map(move |guid| check_reference(store, guid, target))
        });
        try_join_all(checks).await?;
        Ok(())
    }
}

async fn check_reference<S>(store: &S, guid: &Guid, expected: &'static str) -> Result<(), Error>
where
    S: PersistenceStore + ?Sized,
{
    let dangling = || Error::DanglingReference {
        guid: guid.clone(),
        expected,
    };
    if guid.table() != expected {
        return Err(dangling());
    }
    match store
        .fetch_by_id(expected, guid.row())
        .await
        .map_err(Error::store)?
    {
        Some(_) => Ok(()),
        None => Err(dangling()),
    }
}

fn mismatch(field: Option<&'static str>, expected: &str, found: &InputValue) -> ValidationError {
    ValidationError::TypeMismatch {
        field: field.unwrap_or_default(),
        expected: expected.to_string(),
        found: match found {
            InputValue::Value(value) => value.kind(),
            InputValue::Node(_) => "input object",
            InputValue::Ref(_) => "id",
            InputValue::List(_) => "list",
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::graphql::{
        backend::test::MemoryStore,
        type_system::{test_types::*, Catalog},
    };
    use crate::init_logging;

    fn resolver() -> Resolver {
        Resolver::new(catalog())
    }

    fn new_child(graph: &mut InputGraph, name: &str) -> NodeId {
        graph.add(InputNode::new(&CHILD).field("name", name))
    }

    async fn existing_child(store: &MemoryStore, name: &str) -> Guid {
        let row = store
            .insert("children", &Record::new().with("name", name))
            .await
            .unwrap();
        Guid::new("children", row)
    }

    #[async_std::test]
    async fn test_create_single_node() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let root = new_child(&mut graph, "Joanne");

        let guid = resolver().resolve(&graph, root, &store).await.unwrap();
        assert_eq!(guid, Guid::new("children", 1));
        assert_eq!(
            store.rows("children").await,
            [Record::new().with("name", "Joanne")]
        );
    }

    #[async_std::test]
    async fn test_nested_child() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let child = new_child(&mut graph, "Joanne");
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", [child].into_iter().collect::<InputValue>()),
        );

        let guid = resolver().resolve(&graph, root, &store).await.unwrap();
        assert_eq!(guid, Guid::new("parents", 1));
        assert_eq!(
            store.rows("children").await,
            [Record::new().with("name", "Joanne")]
        );
        assert_eq!(
            store.rows("parents").await,
            [Record::new()
                .with("name", "Mary")
                .with("child_ids", vec![Guid::new("children", 1)])]
        );
    }

    #[async_std::test]
    async fn test_existing_and_nested_child() {
        init_logging();
        let store = MemoryStore::default();
        let existing = existing_child(&store, "Suzy").await;

        let mut graph = InputGraph::new();
        let child = new_child(&mut graph, "Joanne");
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", [child].into_iter().collect::<InputValue>())
                .field(
                    "child_ids",
                    [existing.clone()].into_iter().collect::<InputValue>(),
                ),
        );

        resolver().resolve(&graph, root, &store).await.unwrap();
        // The existing child is linked, not re-inserted.
        assert_eq!(store.rows("children").await.len(), 2);
        assert_eq!(
            store.rows("parents").await[0].ids("child_ids"),
            [Guid::new("children", 2), existing]
        );
    }

    #[async_std::test]
    async fn test_deeply_nested_shared_child() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let shared = new_child(&mut graph, "shared");
        let parent = graph.add(
            InputNode::new(&PARENT)
                .field("name", "p")
                .field("children", [shared].into_iter().collect::<InputValue>()),
        );
        let root = graph.add(
            InputNode::new(&FAMILY)
                .field("parent", parent)
                .field(
                    "children",
                    InputValue::List(vec![InputValue::List(vec![shared.into()])]),
                ),
        );

        let guid = resolver().resolve(&graph, root, &store).await.unwrap();
        assert_eq!(guid, Guid::new("families", 1));
        assert_eq!(store.rows("children").await.len(), 1);
        assert_eq!(
            store.rows("families").await,
            [Record::new()
                .with("parent_id", Guid::new("parents", 1))
                .with("child_ids", vec![Guid::new("children", 1)])]
        );
    }

    #[async_std::test]
    async fn test_missing_required_link() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let root = graph.add(InputNode::new(&PARENT).field("name", "Mary"));
        assert_eq!(
            resolver().resolve(&graph, root, &store).await.unwrap_err(),
            Error::MissingRequiredLink {
                ty: "ParentInput",
                field: "child_ids",
                nested: "children",
            }
        );

        // Nested nodes are checked before anything is inserted.
        let mut graph = InputGraph::new();
        let child = new_child(&mut graph, "Joanne");
        let parent = graph.add(InputNode::new(&PARENT).field("name", "p"));
        let root = graph.add(
            InputNode::new(&FAMILY)
                .field("parent", parent)
                .field("children", [child].into_iter().collect::<InputValue>()),
        );
        assert!(matches!(
            resolver().resolve(&graph, root, &store).await,
            Err(Error::MissingRequiredLink { .. })
        ));
        assert!(store.rows("children").await.is_empty());
    }

    #[async_std::test]
    async fn test_empty_links() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", InputValue::List(vec![])),
        );
        assert_eq!(
            resolver().resolve(&graph, root, &store).await.unwrap_err(),
            Error::Validation {
                ty: "ParentInput",
                source: ValidationError::TooFewLinks {
                    field: "child_ids",
                    min: 1,
                    found: 0,
                },
            }
        );
    }

    #[async_std::test]
    async fn test_dangling_reference() {
        init_logging();
        let store = MemoryStore::default();
        let existing = existing_child(&store, "Suzy").await;

        for guid in [Guid::new("children", 7), Guid::new("parents", existing.row())] {
            let mut graph = InputGraph::new();
            let root = graph.add(
                InputNode::new(&PARENT)
                    .field("name", "Mary")
                    .field("child_ids", [guid.clone()].into_iter().collect::<InputValue>()),
            );
            assert_eq!(
                resolver().resolve(&graph, root, &store).await.unwrap_err(),
                Error::DanglingReference {
                    guid,
                    expected: "children",
                }
            );
        }
        assert!(store.rows("parents").await.is_empty());
    }

    #[async_std::test]
    async fn test_invalid_fields() {
        init_logging();
        let store = MemoryStore::default();

        let mut graph = InputGraph::new();
        let root = graph.add(InputNode::new(&CHILD).field("name", 3i64));
        assert!(matches!(
            resolver().resolve(&graph, root, &store).await,
            Err(Error::Validation {
                source: ValidationError::TypeMismatch { field: "name", .. },
                ..
            })
        ));

        let mut graph = InputGraph::new();
        let root = graph.add(
            InputNode::new(&CHILD)
                .field("name", "Joanne")
                .field("age", 3i64),
        );
        assert!(matches!(
            resolver().resolve(&graph, root, &store).await,
            Err(Error::Validation {
                source: ValidationError::UnexpectedField { .. },
                ..
            })
        ));

        // A nested field holding an ID instead of an input object.
        let mut graph = InputGraph::new();
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", Guid::new("children", 1)),
        );
        assert!(matches!(
            resolver().resolve(&graph, root, &store).await,
            Err(Error::Validation {
                source: ValidationError::TypeMismatch { field: "children", .. },
                ..
            })
        ));

        // A required scalar missing on a nested node is only detected when that node is
        // persisted, after its own children.
        let mut graph = InputGraph::new();
        let child = graph.add(InputNode::new(&CHILD));
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", [child].into_iter().collect::<InputValue>()),
        );
        assert_eq!(
            resolver().resolve(&graph, root, &store).await.unwrap_err(),
            Error::Validation {
                ty: "ChildInput",
                source: ValidationError::MissingField { field: "name" },
            }
        );
        assert!(store.rows("children").await.is_empty());
    }

    #[async_std::test]
    async fn test_no_rollback() {
        init_logging();
        let store = MemoryStore::read_only("parents");
        let mut graph = InputGraph::new();
        let child = new_child(&mut graph, "Joanne");
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", [child].into_iter().collect::<InputValue>()),
        );

        assert!(matches!(
            resolver().resolve(&graph, root, &store).await,
            Err(Error::Store { .. })
        ));
        // The child which was persisted before the failure remains.
        assert_eq!(store.rows("children").await.len(), 1);
    }

    #[async_std::test]
    async fn test_graph_too_large() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let children = (0..3)
            .map(|i| new_child(&mut graph, &i.to_string()))
            .collect::<InputValue>();
        let root = graph.add(
            InputNode::new(&PARENT)
                .field("name", "Mary")
                .field("children", children),
        );

        assert_eq!(Resolver::new(catalog()).config(), &Config::default());
        let resolver = Resolver::with_config(catalog(), Config { node_limit: 3 });
        assert_eq!(resolver.config().node_limit, 3);
        assert_eq!(
            resolver.resolve(&graph, root, &store).await.unwrap_err(),
            Error::GraphTooLarge { limit: 3 }
        );
        assert!(store.rows("children").await.is_empty());

        let resolver = Resolver::with_config(catalog(), Config { node_limit: 4 });
        resolver.resolve(&graph, root, &store).await.unwrap();
        assert_eq!(store.rows("children").await.len(), 3);
    }

    #[async_std::test]
    async fn test_unregistered_type() {
        init_logging();
        let store = MemoryStore::default();
        let mut graph = InputGraph::new();
        let root = new_child(&mut graph, "Joanne");

        let resolver = Resolver::new(Catalog::default());
        assert_eq!(
            resolver.resolve(&graph, root, &store).await.unwrap_err(),
            Error::UnknownType { ty: "ChildInput" }
        );
    }
}
