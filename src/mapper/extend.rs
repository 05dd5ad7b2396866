//! Runtime schema extension and magic kinds
//!
//! Extending an instance derives an anonymous subkind (`Name1`, `Name2`, ...)
//! and rebuilds the instance from its own serialized form plus the new
//! values. The rebuilt instance takes the old one's place under its parent,
//! so callers must continue with the returned id.

use serde_json::{Map, Value};

use super::parse::Check;
use super::{FieldValue, MapperGraph, NodeId};
use crate::compiler;
use crate::error::{MapperError, Result};
use crate::shape::{self, DeclaredType, TypeShape};

/// A field added at runtime: name, declared type and initial raw value
pub type NewProperty = (String, DeclaredType, Value);

impl MapperGraph {
    /// Add fields to an instance. Returns the id of the rebuilt instance,
    /// or `id` itself when nothing is added.
    pub fn add_properties(&mut self, id: NodeId, properties: Vec<NewProperty>) -> Result<NodeId> {
        let kind = self.kind_of(id)?.clone();
        let mut shaped = Vec::with_capacity(properties.len());
        for (name, declared, value) in properties {
            let shape = shape::validate(kind.name(), &name, &declared)?;
            shaped.push((name, shape, value));
        }
        self.extend_with(id, shaped)
    }

    /// Add one field. See [`MapperGraph::add_properties`].
    pub fn add_property(&mut self, id: NodeId, name: impl Into<String>, declared: DeclaredType, value: Value) -> Result<NodeId> {
        self.add_properties(id, vec![(name.into(), declared, value)])
    }

    fn extend_with(&mut self, id: NodeId, properties: Vec<(String, TypeShape, Value)>) -> Result<NodeId> {
        if properties.is_empty() {
            return Ok(id);
        }
        let kind = self.kind_of(id)?.clone();
        for (name, _, _) in &properties {
            if kind.table().contains_key(name) {
                return Err(MapperError::Key {
                    kind: kind.name().to_string(),
                    field: name.clone(),
                    reason: "already exists",
                });
            }
        }

        let mut data = match self.to_raw(id)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut added = Vec::with_capacity(properties.len());
        for (name, shape, value) in properties {
            data.insert(name.clone(), value);
            added.push((name, shape));
        }
        let derived = compiler::derive(&kind, &added, &[])?;

        let parent = self.parent_edge(id);
        let unknown = self.node(id)?.unknown.clone();
        let rebuilt = self.build_node(
            &derived,
            &Value::Object(data),
            parent.as_ref().map(|(owner, field)| (*owner, field.as_str())),
            Check::KeysOnly,
        )?;

        let node = self.node_mut(rebuilt)?;
        for (key, value) in unknown {
            node.unknown.entry(key).or_insert(value);
        }
        node.changed = true;

        if let Some((owner, field)) = parent {
            if let Some(value) = self.node_mut(owner)?.values.get_mut(&field) {
                value.substitute(id, rebuilt);
            }
        }
        self.discard(id);
        Ok(rebuilt)
    }

    /// Drop a declared field from an instance. The instance keeps its id and
    /// moves to a derived kind without the field.
    pub fn remove_property(&mut self, id: NodeId, field: &str) -> Result<()> {
        let kind = self.kind_of(id)?.clone();
        if !kind.table().contains_key(field) {
            return Err(MapperError::Key {
                kind: kind.name().to_string(),
                field: field.to_string(),
                reason: "does not exist",
            });
        }
        let derived = compiler::derive(&kind, &[], &[field])?;

        let node = self.node_mut(id)?;
        node.kind = derived;
        let old = node.values.shift_remove(field).unwrap_or(FieldValue::Null);
        if !old.is_null() {
            node.changed = true;
        }
        self.discard_value(&old);
        Ok(())
    }

    /// Bring a magic instance in line with `raw`: keys outside the table
    /// become new fields of the kind's magic shape, declared fields missing
    /// from `raw` are nulled, then the rest is merged.
    pub fn apply(&mut self, id: NodeId, raw: &Value) -> Result<NodeId> {
        let kind = self.kind_of(id)?.clone();
        let magic = kind
            .magic_shape()
            .cloned()
            .ok_or_else(|| MapperError::definition(kind.name(), "kind declares no magic shape"))?;
        let data = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(self.unsupported(id, kind.name(), other, format!("expected a {} record", kind.name())));
            }
        };

        let mut rest = Map::new();
        let mut added = Vec::new();
        for (key, value) in data {
            if kind.table().contains_key(&key) {
                rest.insert(key, value);
            } else {
                added.push((key, magic.clone(), value));
            }
        }
        for field in kind.table().keys() {
            rest.entry(field.clone()).or_insert(Value::Null);
        }

        let extended = !added.is_empty();
        let target = self.extend_with(id, added)?;
        self.merge(target, &Value::Object(rest))?;
        if extended {
            self.mark_changed(target)?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Int, Str};
    use crate::schema::{Interface, KindDef};
    use serde_json::json;

    #[test]
    fn test_add_properties_rebuilds_in_place() {
        let inner = KindDef::new("Inner")
            .implements(Interface::new("IInner").field("a", DeclaredType::adapter(Int)))
            .compile()
            .unwrap();
        let outer = KindDef::new("Outer")
            .implements(Interface::new("IOuter").field("inner", DeclaredType::kind(&inner)))
            .compile()
            .unwrap();
        let (mut graph, root) = MapperGraph::from_raw(&outer, &json!({"inner": {"a": 1}})).unwrap();
        let child = graph.child(root, "inner").unwrap().unwrap();

        let extended = graph
            .add_property(child, "b", DeclaredType::adapter(Str), json!("new"))
            .unwrap();

        assert_ne!(extended, child);
        assert!(!graph.contains(child));
        assert_eq!(graph.child(root, "inner").unwrap(), Some(extended));
        assert!(graph.is_changed(extended).unwrap());
        assert!(graph.kind_of(extended).unwrap().is_a(&inner));
        assert_eq!(graph.parent(extended).unwrap(), root);
        assert_eq!(
            graph.to_raw(root).unwrap(),
            json!({"inner": {"a": 1, "b": "new"}})
        );
        assert_eq!(inner.table().len(), 1);
    }

    #[test]
    fn test_add_existing_property_fails() {
        let kind = KindDef::new("A")
            .implements(Interface::new("IA").field("a", DeclaredType::adapter(Int)))
            .compile()
            .unwrap();
        let (mut graph, root) = MapperGraph::from_raw(&kind, &json!({"a": 1})).unwrap();
        let err = graph
            .add_property(root, "a", DeclaredType::adapter(Int), json!(2))
            .unwrap_err();
        assert!(matches!(err, MapperError::Key { .. }));
        assert_eq!(graph.add_properties(root, vec![]).unwrap(), root);
    }

    #[test]
    fn test_remove_property() {
        let kind = KindDef::new("A")
            .implements(
                Interface::new("IA")
                    .field("a", DeclaredType::adapter(Int))
                    .field("b", DeclaredType::adapter(Int)),
            )
            .compile()
            .unwrap();
        let (mut graph, root) = MapperGraph::from_raw(&kind, &json!({"a": 1, "b": 2})).unwrap();

        graph.remove_property(root, "b").unwrap();
        assert!(graph.is_changed(root).unwrap());
        assert!(graph.kind_of(root).unwrap().shape("b").is_none());
        assert_eq!(graph.to_raw(root).unwrap(), json!({"a": 1}));
        assert!(kind.shape("b").is_some());

        let err = graph.remove_property(root, "b").unwrap_err();
        assert!(matches!(err, MapperError::Key { .. }));
    }

    #[test]
    fn test_magic_kind_grows_fields() {
        let kind = KindDef::new("Bag")
            .implements(Interface::new("IBag").field("name", DeclaredType::adapter(Str)))
            .magic(DeclaredType::adapter(Int))
            .compile()
            .unwrap();

        let (mut graph, root) =
            MapperGraph::from_raw(&kind, &json!({"name": "b", "x": 1, "y": 2})).unwrap();
        assert_eq!(graph.to_raw(root).unwrap(), json!({"name": "b", "x": 1, "y": 2}));
        assert!(!graph.is_changed(root).unwrap());

        let next = graph.apply(root, &json!({"x": 5, "z": 3})).unwrap();
        assert!(graph.is_changed(next).unwrap());
        assert_eq!(graph.to_raw(next).unwrap(), json!({"x": 5, "z": 3}));
    }

    fn sparse_outer(magic: bool) -> std::sync::Arc<crate::schema::MapperKind> {
        let inner = KindDef::new("Inner")
            .implements(
                Interface::new("IInner")
                    .field("a", DeclaredType::adapter(Int))
                    .field("b", DeclaredType::adapter(Int))
                    .field("c", DeclaredType::adapter(Int))
                    .field("d", DeclaredType::adapter(Int)),
            )
            .compile()
            .unwrap();
        let mut def = KindDef::new("Outer").implements(
            Interface::new("IOuter")
                .field("x", DeclaredType::adapter(Int))
                .field("inner", DeclaredType::kind(&inner)),
        );
        if magic {
            def = def.magic(DeclaredType::adapter(Str));
        }
        def.compile().unwrap()
    }

    #[test]
    fn test_rebuild_keeps_sparse_children() {
        let outer = sparse_outer(false);
        let raw = json!({"x": 1, "inner": {"a": 1, "b": null, "c": null, "d": null}});
        let (mut graph, root) = MapperGraph::from_raw(&outer, &raw).unwrap();

        let extended = graph
            .add_property(root, "y", DeclaredType::adapter(Str), json!("new"))
            .unwrap();
        let inner = graph.child(extended, "inner").unwrap().unwrap();
        assert_eq!(graph.path(inner).unwrap(), "Outer1.inner");
        assert_eq!(
            graph.to_raw(extended).unwrap(),
            json!({"x": 1, "inner": {"a": 1}, "y": "new"})
        );
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_apply_keeps_sparse_children() {
        let outer = sparse_outer(true);
        let raw = json!({"x": 1, "inner": {"a": 1, "b": null, "c": null, "d": null}});
        let (mut graph, root) = MapperGraph::from_raw(&outer, &raw).unwrap();

        let next = graph
            .apply(root, &json!({"x": 2, "inner": {"a": 1}, "y": "new"}))
            .unwrap();
        assert!(graph.is_changed(next).unwrap());
        assert_eq!(
            graph.to_raw(next).unwrap(),
            json!({"x": 2, "inner": {"a": 1}, "y": "new"})
        );
    }
}
