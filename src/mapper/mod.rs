//! Mapper Core
//!
//! Mapper instances live in a [`MapperGraph`] arena. Every instance is a
//! [`MapperNode`] addressed by a [`NodeId`]; a stored [`FieldValue::Node`] is
//! the owning parent -> child link, mirrored by a graph edge weighted with the
//! field name. Parent, root and path lookups walk those edges backwards and
//! never imply ownership: dropping a field value releases the child subtree.
//!
//! Construction lives in `parse`, merging in `merge`, `to_raw` in
//! `serialize` and runtime schema extension in `extend`.

mod extend;
mod merge;
mod parse;
mod serialize;

pub use serialize::RawOptions;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::{Map, Value};

use crate::adapter::ScalarValue;
use crate::error::{MapperError, Result};
use crate::schema::{Accessor, MapperKind};

/// Longest `describe` rendering before it is cut
const DESCRIBE_LEN: usize = 200;

/// Identity of a mapper instance inside its graph.
///
/// Arena slots are reused once an instance is discarded, so an id also
/// carries the serial number of the instance it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: NodeIndex,
    serial: u32,
}

impl NodeId {
    /// Arena slot of the instance
    pub fn index(&self) -> usize {
        self.index.index()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index.index(), self.serial)
    }
}

/// A stored field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Present but empty, or absent
    Null,
    Bool(bool),
    Scalar(ScalarValue),
    /// Nested mapper instance owned by this field
    Node(NodeId),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            FieldValue::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Every node directly held by this value.
    pub fn node_ids(&self) -> Vec<NodeId> {
        match self {
            FieldValue::Node(id) => vec![*id],
            FieldValue::List(items) => items.iter().flat_map(FieldValue::node_ids).collect(),
            _ => Vec::new(),
        }
    }

    fn substitute(&mut self, old: NodeId, new: NodeId) {
        match self {
            FieldValue::Node(id) if *id == old => *id = new,
            FieldValue::List(items) => items.iter_mut().for_each(|item| item.substitute(old, new)),
            _ => {}
        }
    }
}

/// One mapper instance
pub struct MapperNode {
    serial: u32,
    kind: Arc<MapperKind>,
    values: IndexMap<String, FieldValue>,
    unknown: Map<String, Value>,
    changed: bool,
    root: OnceCell<NodeId>,
}

impl MapperNode {
    fn new(kind: Arc<MapperKind>, serial: u32) -> Self {
        Self {
            serial,
            kind,
            values: IndexMap::new(),
            unknown: Map::new(),
            changed: false,
            root: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> &Arc<MapperKind> {
        &self.kind
    }

    /// Stored values keyed by field name, in arrival order.
    pub fn values(&self) -> &IndexMap<String, FieldValue> {
        &self.values
    }

    pub fn unknown(&self) -> &Map<String, Value> {
        &self.unknown
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

impl fmt::Debug for MapperNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperNode")
            .field("kind", &self.kind.name())
            .field("values", &self.values)
            .field("unknown", &self.unknown)
            .field("changed", &self.changed)
            .finish()
    }
}

/// Arena holding mapper instances and their parent -> child links
#[derive(Debug, Default)]
pub struct MapperGraph {
    graph: StableDiGraph<MapperNode, String>,
    serial: u32,
}

impl MapperGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a root instance in a fresh graph.
    pub fn from_raw(kind: &Arc<MapperKind>, raw: &Value) -> Result<(Self, NodeId)> {
        let mut graph = Self::new();
        let root = graph.construct(kind, raw)?;
        Ok((graph, root))
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph
            .node_weight(id.index)
            .map_or(false, |node| node.serial == id.serial)
    }

    pub fn node(&self, id: NodeId) -> Result<&MapperNode> {
        self.graph
            .node_weight(id.index)
            .filter(|node| node.serial == id.serial)
            .ok_or(MapperError::UnknownNode(id.index()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MapperNode> {
        self.graph
            .node_weight_mut(id.index)
            .filter(|node| node.serial == id.serial)
            .ok_or(MapperError::UnknownNode(id.index()))
    }

    /// Current id of the instance in an arena slot.
    fn id_at(&self, index: NodeIndex) -> Option<NodeId> {
        self.graph
            .node_weight(index)
            .map(|node| NodeId { index, serial: node.serial })
    }

    pub fn kind_of(&self, id: NodeId) -> Result<&Arc<MapperKind>> {
        Ok(&self.node(id)?.kind)
    }

    /// The raw stored value of a field, bypassing accessors.
    pub fn value(&self, id: NodeId, field: &str) -> Result<Option<&FieldValue>> {
        Ok(self.node(id)?.values.get(field))
    }

    fn stored(&self, id: NodeId, field: &str) -> Result<FieldValue> {
        Ok(self.value(id, field)?.cloned().unwrap_or(FieldValue::Null))
    }

    /// Read a field through its accessor.
    pub fn get(&self, id: NodeId, field: &str) -> Result<FieldValue> {
        let node = self.node(id)?;
        let stored = node.values.get(field).cloned().unwrap_or(FieldValue::Null);
        match node.kind.accessor(field) {
            Some(Accessor::Stored) => Ok(stored),
            Some(Accessor::Computed(getter)) => Ok(getter(&stored)),
            None => Err(MapperError::Key {
                kind: node.kind.name().to_string(),
                field: field.to_string(),
                reason: "does not exist",
            }),
        }
    }

    /// The nested instance stored in a field, if any.
    pub fn child(&self, id: NodeId, field: &str) -> Result<Option<NodeId>> {
        Ok(self.value(id, field)?.and_then(FieldValue::as_node))
    }

    pub fn unknown(&self, id: NodeId) -> Result<&Map<String, Value>> {
        Ok(&self.node(id)?.unknown)
    }

    pub fn is_changed(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.changed)
    }

    pub fn mark_changed(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.changed = true;
        Ok(())
    }

    pub fn mark_original(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.changed = false;
        Ok(())
    }

    fn parent_edge(&self, id: NodeId) -> Option<(NodeId, String)> {
        if !self.contains(id) {
            return None;
        }
        let edge = self.graph.edges_directed(id.index, Direction::Incoming).next()?;
        Some((self.id_at(edge.source())?, edge.weight().clone()))
    }

    /// The instance holding `id`; a root is its own parent.
    pub fn parent(&self, id: NodeId) -> Result<NodeId> {
        self.node(id)?;
        Ok(self.parent_edge(id).map(|(parent, _)| parent).unwrap_or(id))
    }

    /// Field name `id` is held under, if it has a parent.
    pub fn field_name(&self, id: NodeId) -> Result<Option<String>> {
        self.node(id)?;
        Ok(self.parent_edge(id).map(|(_, field)| field))
    }

    /// Topmost instance above `id`. Cached after the first walk.
    pub fn root_of(&self, id: NodeId) -> Result<NodeId> {
        let node = self.node(id)?;
        if let Some(root) = node.root.get() {
            return Ok(*root);
        }
        let root = match self.parent_edge(id) {
            Some((parent, _)) => self.root_of(parent)?,
            None => id,
        };
        let _ = node.root.set(root);
        Ok(root)
    }

    /// Dotted path from the root to `id`: the root's kind name, then field names.
    pub fn path(&self, id: NodeId) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = id;
        loop {
            match self.parent_edge(current) {
                Some((parent, field)) => {
                    parts.push(field);
                    current = parent;
                }
                None => {
                    parts.push(self.node(current)?.kind.name().to_string());
                    break;
                }
            }
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    fn field_path(&self, id: NodeId, field: &str) -> String {
        match self.path(id) {
            Ok(path) => format!("{path}.{field}"),
            Err(_) => field.to_string(),
        }
    }

    /// Diagnostic rendering: `<Kind: {...}>`.
    pub fn describe(&self, id: NodeId) -> Result<String> {
        let kind = self.kind_of(id)?.name().to_string();
        let rendered = self.to_raw(id)?.to_string();
        if rendered.chars().count() > DESCRIBE_LEN {
            let cut: String = rendered.chars().take(DESCRIBE_LEN).collect();
            return Ok(format!("<{kind}: {cut} ...>"));
        }
        Ok(format!("<{kind}: {rendered}>"))
    }

    /// Compare two instances of the exact same kind.
    ///
    /// With a key field only the key values are compared, otherwise every
    /// declared field. Instances of different kinds can not be compared.
    pub fn equals(&self, a: NodeId, other: &MapperGraph, b: NodeId) -> Result<bool> {
        let left = self.kind_of(a)?;
        let right = other.kind_of(b)?;
        if !Arc::ptr_eq(left, right) {
            return Err(MapperError::KindMismatch {
                left: left.name().to_string(),
                right: right.name().to_string(),
            });
        }
        if let Some(key) = &left.options().key_field {
            return self.field_eq(&self.get(a, key)?, other, &other.get(b, key)?);
        }
        for field in left.table().keys() {
            if !self.field_eq(&self.get(a, field)?, other, &other.get(b, field)?)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn field_eq(&self, a: &FieldValue, other: &MapperGraph, b: &FieldValue) -> Result<bool> {
        match (a, b) {
            (FieldValue::Node(x), FieldValue::Node(y)) => {
                if !Arc::ptr_eq(self.kind_of(*x)?, other.kind_of(*y)?) {
                    return Ok(false);
                }
                self.equals(*x, other, *y)
            }
            (FieldValue::List(xs), FieldValue::List(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(false);
                }
                for (x, y) in xs.iter().zip(ys) {
                    if !self.field_eq(x, other, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(a == b),
        }
    }

    /// Add an empty instance, linked under `parent` when given.
    fn attach(&mut self, kind: Arc<MapperKind>, parent: Option<(NodeId, &str)>) -> NodeId {
        self.serial = self.serial.wrapping_add(1);
        let serial = self.serial;
        let index = self.graph.add_node(MapperNode::new(kind, serial));
        if let Some((parent, field)) = parent {
            self.graph.add_edge(parent.index, index, field.to_string());
        }
        NodeId { index, serial }
    }

    /// Remove an instance and everything it owns. Missing nodes are ignored.
    pub(crate) fn discard(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        let mut stack = vec![id.index];
        while let Some(current) = stack.pop() {
            if !self.graph.contains_node(current) {
                continue;
            }
            stack.extend(self.graph.neighbors_directed(current, Direction::Outgoing));
            self.graph.remove_node(current);
        }
    }

    fn discard_value(&mut self, value: &FieldValue) {
        for id in value.node_ids() {
            self.discard(id);
        }
    }

    /// Discard nodes held by `old` that `new` no longer holds.
    fn release(&mut self, old: &FieldValue, new: &FieldValue) {
        let kept = new.node_ids();
        for id in old.node_ids() {
            if !kept.contains(&id) {
                self.discard(id);
            }
        }
    }

    fn set_value(&mut self, id: NodeId, field: &str, value: FieldValue) -> Result<()> {
        self.node_mut(id)?.values.insert(field.to_string(), value);
        Ok(())
    }
}

/// JSON truthiness used for plain `bool` fields.
fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Int, Str};
    use crate::schema::{Interface, KindDef};
    use crate::shape::DeclaredType;
    use serde_json::json;

    fn tree() -> Arc<MapperKind> {
        KindDef::new("Node")
            .implements(
                Interface::new("INode")
                    .field("name", DeclaredType::adapter(Str))
                    .field("child", DeclaredType::forward("Node")),
            )
            .similarity(0)
            .compile()
            .unwrap()
    }

    #[test]
    fn test_navigation() {
        let kind = tree();
        let (graph, root) = MapperGraph::from_raw(
            &kind,
            &json!({"name": "a", "child": {"name": "b", "child": {"name": "c"}}}),
        )
        .unwrap();

        let b = graph.child(root, "child").unwrap().unwrap();
        let c = graph.child(b, "child").unwrap().unwrap();

        assert_eq!(graph.parent(c).unwrap(), b);
        assert_eq!(graph.parent(root).unwrap(), root);
        assert_eq!(graph.root_of(c).unwrap(), root);
        assert_eq!(graph.root_of(root).unwrap(), root);
        assert_eq!(graph.path(c).unwrap(), "Node.child.child");
        assert_eq!(graph.field_name(b).unwrap().as_deref(), Some("child"));
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_accessors() {
        let kind = KindDef::new("Greeting")
            .implements(Interface::new("IGreeting").field("text", DeclaredType::adapter(Str)))
            .getter("text", |value| match value.as_scalar() {
                Some(s) => {
                    let upper = s.reverse().as_str().unwrap_or_default().to_uppercase();
                    ScalarValue::from_raw(s.adapter(), &json!(upper))
                        .map(FieldValue::Scalar)
                        .unwrap_or(FieldValue::Null)
                }
                None => FieldValue::Null,
            })
            .compile()
            .unwrap();

        let (graph, root) = MapperGraph::from_raw(&kind, &json!({"text": "hi"})).unwrap();
        assert_eq!(graph.to_raw(root).unwrap(), json!({"text": "HI"}));

        let stored = graph.value(root, "text").unwrap().unwrap();
        assert_eq!(stored.as_scalar().unwrap().reverse(), json!("hi"));

        assert!(matches!(graph.get(root, "missing"), Err(MapperError::Key { .. })));
    }

    #[test]
    fn test_equality_by_fields_and_key() {
        let plain = KindDef::new("Point")
            .implements(
                Interface::new("IPoint")
                    .field("x", DeclaredType::adapter(Int))
                    .field("y", DeclaredType::adapter(Int)),
            )
            .compile()
            .unwrap();
        let mut graph = MapperGraph::new();
        let a = graph.construct(&plain, &json!({"x": 1, "y": 2})).unwrap();
        let b = graph.construct(&plain, &json!({"x": 1, "y": 2})).unwrap();
        let c = graph.construct(&plain, &json!({"x": 1, "y": 3})).unwrap();
        assert!(graph.equals(a, &graph, b).unwrap());
        assert!(!graph.equals(a, &graph, c).unwrap());

        let keyed = KindDef::new("Keyed").extends(&plain).key_field("x").compile().unwrap();
        let d = graph.construct(&keyed, &json!({"x": 1, "y": 2})).unwrap();
        let e = graph.construct(&keyed, &json!({"x": 1, "y": 9})).unwrap();
        assert!(graph.equals(d, &graph, e).unwrap());

        assert!(matches!(
            graph.equals(a, &graph, d),
            Err(MapperError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_describe_is_truncated() {
        let kind = tree();
        let long = "x".repeat(400);
        let (graph, root) = MapperGraph::from_raw(&kind, &json!({ "name": long })).unwrap();
        let described = graph.describe(root).unwrap();
        assert!(described.starts_with("<Node: {"));
        assert!(described.ends_with(" ...>"));
    }

    #[test]
    fn test_stale_node_id() {
        let kind = tree();
        let (mut graph, root) = MapperGraph::from_raw(&kind, &json!({"name": "a"})).unwrap();
        graph.discard(root);
        assert!(matches!(graph.node(root), Err(MapperError::UnknownNode(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_reused_slot_rejects_old_id() {
        let kind = tree();
        let counter = KindDef::new("Counter")
            .implements(Interface::new("ICounter").field("a", DeclaredType::adapter(Int)))
            .similarity(0)
            .compile()
            .unwrap();
        let (mut graph, root) =
            MapperGraph::from_raw(&kind, &json!({"name": "a", "child": {"name": "b"}})).unwrap();
        let child = graph.child(root, "child").unwrap().unwrap();

        let extended = graph
            .add_property(child, "size", DeclaredType::adapter(Int), json!(1))
            .unwrap();
        assert_ne!(extended, child);
        assert!(!graph.contains(child));

        // the freed slot is handed to the next instance
        let other = graph.construct(&counter, &json!({"a": 5})).unwrap();
        assert_eq!(other.index(), child.index());
        assert!(!graph.contains(child));
        assert!(matches!(graph.node(child), Err(MapperError::UnknownNode(_))));
        assert!(matches!(
            graph.merge(child, &json!({"a": 99})),
            Err(MapperError::UnknownNode(_))
        ));
        assert!(graph.parent(child).is_err());
        assert_eq!(graph.to_raw(other).unwrap(), json!({"a": 5}));
    }
}
