//! Merging raw records onto existing instances
//!
//! Nested instances are merged in place whenever the incoming record is
//! compatible with them, so node identity survives repeated merges. Every
//! merge starts by marking the target original; afterwards its changed flag
//! tells whether that merge altered anything observable.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::parse::{accepts_record, Check};
use super::{truthy, FieldValue, MapperGraph, NodeId};
use crate::adapter::ScalarValue;
use crate::error::{MapperError, Result};
use crate::schema::MapperKind;
use crate::shape::{Leaf, TypeShape};

/// Outcome of merging one value: the new value and whether it differs
type Merged = (FieldValue, bool);

impl MapperGraph {
    /// Merge a raw record onto an existing instance.
    pub fn merge(&mut self, id: NodeId, raw: &Value) -> Result<NodeId> {
        self.merge_with(id, raw, false)
    }

    /// Merge, optionally rejecting undeclared keys first.
    pub fn merge_with(&mut self, id: NodeId, raw: &Value, validate: bool) -> Result<NodeId> {
        let kind = self.kind_of(id)?.clone();
        let empty = Map::new();
        let data = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(self.unsupported(id, kind.name(), other, format!("expected a {} record", kind.name())));
            }
        };
        if validate {
            kind.check_keys(data, &self.path(id)?)?;
        }

        self.mark_original(id)?;
        for (field, value) in data {
            self.merge_property(id, field, value)?;
        }
        Ok(id)
    }

    /// Merge a single field. Undeclared fields go to the unknown params.
    pub fn merge_property(&mut self, id: NodeId, field: &str, raw: &Value) -> Result<()> {
        let kind = self.kind_of(id)?.clone();
        let shape = match kind.shape(field) {
            Some(shape) => shape,
            None => return self.merge_unknown(id, field, raw),
        };
        let old = self.stored(id, field)?;

        if raw.is_null() {
            trace!(field, "field cleared");
            self.release(&old, &FieldValue::Null);
            self.set_value(id, field, FieldValue::Null)?;
            if !old.is_null() {
                self.mark_changed(id)?;
            }
            return Ok(());
        }

        let (value, changed) = match shape {
            TypeShape::Leaf(leaf) => self.merge_leaf(id, field, leaf, &old, raw, false)?,
            TypeShape::Union(leaves) => self.merge_alternatives(id, field, leaves, &old, raw)?,
            TypeShape::List(inner) => self.merge_list(id, field, inner.alternatives(), &old, raw)?,
        };
        trace!(field, changed, "field merged");

        self.release(&old, &value);
        self.set_value(id, field, value)?;
        if changed {
            self.mark_changed(id)?;
        }
        Ok(())
    }

    /// Replace one declared field with a freshly constructed value.
    pub fn replace_property(&mut self, id: NodeId, field: &str, raw: &Value) -> Result<()> {
        let kind = self.kind_of(id)?.clone();
        let shape = kind.shape(field).ok_or_else(|| MapperError::Key {
            kind: kind.name().to_string(),
            field: field.to_string(),
            reason: "does not exist",
        })?;

        let old = self.stored(id, field)?;
        let value = self.parse_field(id, field, shape, raw, Check::Full)?;
        let changed = self.value_to_raw(&old, false)? != self.value_to_raw(&value, false)?;

        self.release(&old, &value);
        self.set_value(id, field, value)?;
        if changed {
            self.mark_changed(id)?;
        }
        Ok(())
    }

    /// Whether `raw` describes the instance `id`: equal key field values when
    /// the kind declares one, otherwise the kind's compatibility check.
    pub fn is_equal_or_compat(&self, id: NodeId, raw: &Value) -> Result<bool> {
        let kind = self.kind_of(id)?;
        let key = match &kind.options().key_field {
            Some(key) => key,
            None => return Ok(kind.is_compat(raw)),
        };
        let own = self.get(id, key)?;
        let incoming = raw.get(key).unwrap_or(&Value::Null);
        Ok(match &own {
            FieldValue::Scalar(scalar) => ScalarValue::from_raw(scalar.adapter(), incoming)
                .map(|parsed| parsed == *scalar)
                .unwrap_or(false),
            other => self.value_to_raw(other, false)? == *incoming,
        })
    }

    fn merge_unknown(&mut self, id: NodeId, field: &str, raw: &Value) -> Result<()> {
        let node = self.node_mut(id)?;
        let old = node.unknown.get(field).cloned();
        let value = match (&old, raw) {
            (Some(Value::Object(old_map)), Value::Object(new_map)) => {
                Value::Object(merge_records(old_map.clone(), new_map))
            }
            _ => raw.clone(),
        };
        let changed = old.as_ref() != Some(&value);
        node.unknown.insert(field.to_string(), value);
        if changed {
            node.changed = true;
        }
        Ok(())
    }

    /// Merge a value against one leaf. `selective` as in construction.
    fn merge_leaf(
        &mut self,
        id: NodeId,
        field: &str,
        leaf: &Leaf,
        old: &FieldValue,
        raw: &Value,
        selective: bool,
    ) -> Result<Merged> {
        match leaf {
            Leaf::Bool => {
                let value = match raw.as_bool() {
                    Some(b) => b,
                    None if selective => return Err(self.unsupported(id, field, raw, "expected a boolean")),
                    None => truthy(raw),
                };
                Ok((FieldValue::Bool(value), old.as_bool() != Some(value)))
            }
            Leaf::Adapter(adapter) => {
                if let FieldValue::Scalar(scalar) = old {
                    if scalar.is_from(adapter) {
                        if let Ok(next) = scalar.replace(raw) {
                            let changed = next.is_changed();
                            return Ok((FieldValue::Scalar(next), changed));
                        }
                    }
                }
                let fresh = ScalarValue::from_raw(adapter, raw)
                    .map(FieldValue::Scalar)
                    .map_err(|e| self.unsupported(id, field, raw, e.to_string()))?;
                let changed = fresh != *old;
                Ok((fresh, changed))
            }
            Leaf::Kind(kind_ref) => {
                let kind = kind_ref.get()?;
                if !raw.is_object() {
                    return Err(self.unsupported(id, field, raw, format!("expected a {} record", kind.name())));
                }
                if let FieldValue::Node(child) = old {
                    if self.kind_of(*child)?.is_a(&kind) && self.is_equal_or_compat(*child, raw)? {
                        trace!(field, "merging into existing instance");
                        self.merge(*child, raw)?;
                        return Ok((FieldValue::Node(*child), self.is_changed(*child)?));
                    }
                }
                if selective && !accepts_record(&kind, raw) {
                    return Err(self.unsupported(id, field, raw, format!("record is not compatible with {}", kind.name())));
                }
                let child = self.build_node(&kind, raw, Some((id, field)), Check::Full)?;
                Ok((FieldValue::Node(child), true))
            }
            Leaf::Forward(name) => Err(MapperError::definition(name, "forward reference was never resolved")),
        }
    }

    fn merge_alternatives(
        &mut self,
        id: NodeId,
        field: &str,
        leaves: &[Leaf],
        old: &FieldValue,
        raw: &Value,
    ) -> Result<Merged> {
        for leaf in leaves {
            match self.merge_leaf(id, field, leaf, old, raw, true) {
                Ok(merged) => return Ok(merged),
                Err(e) if e.is_recoverable() => {
                    debug!(field, alternative = ?leaf, error = %e, "skipped alternative");
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.unsupported(id, field, raw, "no declared alternative accepts the value"))
    }

    /// Merge a sequence. Existing elements are reused at most once each; the
    /// result follows the order of the incoming sequence.
    fn merge_list(
        &mut self,
        id: NodeId,
        field: &str,
        leaves: &[Leaf],
        old: &FieldValue,
        raw: &Value,
    ) -> Result<Merged> {
        let items = match raw.as_array() {
            Some(items) => items,
            None => return Err(self.wrong_type(id, field, raw, "expected a list")),
        };

        let mut pool: Vec<FieldValue> = old.as_list().map(<[_]>::to_vec).unwrap_or_default();
        let mut values = Vec::with_capacity(items.len());
        let mut created = Vec::new();
        let mut changed = false;

        for item in items {
            if item.is_null() {
                values.push(FieldValue::Null);
                continue;
            }
            match self.merge_item(id, field, leaves, &mut pool, item) {
                Ok((value, item_changed, fresh)) => {
                    changed |= item_changed;
                    if fresh {
                        created.push(value.clone());
                    }
                    values.push(value);
                }
                Err(e) => {
                    self.discard_value(&FieldValue::List(created));
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    return Err(self.wrong_type(id, field, item, format!("can not select type for item: {e}")));
                }
            }
        }

        let merged = FieldValue::List(values);
        if !changed {
            changed = self.value_to_raw(old, false)? != self.value_to_raw(&merged, false)?;
        }
        Ok((merged, changed))
    }

    /// Merge one list element: reuse a matching pool element, otherwise
    /// build a fresh one from the first alternative that accepts it.
    /// Returns the value, whether it changed and whether it was created.
    fn merge_item(
        &mut self,
        id: NodeId,
        field: &str,
        leaves: &[Leaf],
        pool: &mut Vec<FieldValue>,
        item: &Value,
    ) -> Result<(FieldValue, bool, bool)> {
        for leaf in leaves {
            match leaf {
                Leaf::Bool => {
                    let Some(b) = item.as_bool() else { continue };
                    let value = FieldValue::Bool(b);
                    return Ok(match pool.iter().position(|v| *v == value) {
                        Some(pos) => {
                            pool.remove(pos);
                            (value, false, false)
                        }
                        None => (value, true, false),
                    });
                }
                Leaf::Adapter(adapter) => {
                    let Ok(fresh) = ScalarValue::from_raw(adapter, item) else { continue };
                    let exact = pool
                        .iter()
                        .position(|v| v.as_scalar().map(|s| *s == fresh).unwrap_or(false));
                    let same_adapter = || {
                        pool.iter()
                            .position(|v| v.as_scalar().map(|s| s.is_from(adapter)).unwrap_or(false))
                    };
                    if let Some(pos) = exact.or_else(same_adapter) {
                        if let FieldValue::Scalar(existing) = pool.remove(pos) {
                            if let Ok(next) = existing.replace(item) {
                                let changed = next.is_changed();
                                return Ok((FieldValue::Scalar(next), changed, false));
                            }
                        }
                    }
                    return Ok((FieldValue::Scalar(fresh), true, false));
                }
                Leaf::Kind(kind_ref) => {
                    let kind = kind_ref.get()?;
                    if !item.is_object() {
                        continue;
                    }
                    if let Some(pos) = self.find_compatible(pool.as_slice(), &kind, item)? {
                        if let FieldValue::Node(child) = pool.remove(pos) {
                            self.merge(child, item)?;
                            return Ok((FieldValue::Node(child), self.is_changed(child)?, false));
                        }
                    }
                    if !accepts_record(&kind, item) {
                        continue;
                    }
                    match self.build_node(&kind, item, Some((id, field)), Check::Full) {
                        Ok(child) => return Ok((FieldValue::Node(child), true, true)),
                        Err(e) if e.is_recoverable() => {
                            debug!(field, alternative = %kind, error = %e, "skipped alternative");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Leaf::Forward(name) => {
                    return Err(MapperError::definition(name, "forward reference was never resolved"))
                }
            }
        }
        Err(self.unsupported(id, field, item, "no declared alternative accepts the item"))
    }

    fn find_compatible(&self, pool: &[FieldValue], kind: &Arc<MapperKind>, item: &Value) -> Result<Option<usize>> {
        for (pos, value) in pool.iter().enumerate() {
            if let FieldValue::Node(child) = value {
                if self.kind_of(*child)?.is_a(kind) && self.is_equal_or_compat(*child, item)? {
                    return Ok(Some(pos));
                }
            }
        }
        Ok(None)
    }
}

/// Deep merge of two records; `incoming` wins on conflicting leaves.
fn merge_records(mut existing: Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    for (key, value) in incoming {
        let merged = match (existing.remove(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => Value::Object(merge_records(old, new)),
            _ => value.clone(),
        };
        existing.insert(key.clone(), merged);
    }
    existing
}
