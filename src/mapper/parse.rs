//! Construction of mapper instances from raw records

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{truthy, FieldValue, MapperGraph, NodeId};
use crate::adapter::ScalarValue;
use crate::error::{truncate_value, MapperError, Result};
use crate::schema::MapperKind;
use crate::shape::{Leaf, TypeShape};

/// How much checking a new instance goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Check {
    /// Key validation, the completeness/similarity check and magic keys
    Full,
    /// Key validation only; used when an instance and its children are
    /// rebuilt internally
    KeysOnly,
}

impl MapperGraph {
    /// Construct a root instance of `kind` from a raw record.
    pub fn construct(&mut self, kind: &Arc<MapperKind>, raw: &Value) -> Result<NodeId> {
        self.build_node(kind, raw, None, Check::Full)
    }

    pub(super) fn build_node(
        &mut self,
        kind: &Arc<MapperKind>,
        raw: &Value,
        parent: Option<(NodeId, &str)>,
        check: Check,
    ) -> Result<NodeId> {
        let empty = Map::new();
        let data = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                let (field, path) = match parent {
                    Some((owner, field)) => (field.to_string(), self.field_path(owner, field)),
                    None => (kind.name().to_string(), kind.name().to_string()),
                };
                return Err(MapperError::UnsupportedType {
                    kind: kind.name().to_string(),
                    field,
                    path,
                    value: truncate_value(other),
                    reason: format!("expected a {} record", kind.name()),
                });
            }
        };

        if check == Check::Full && kind.magic_shape().is_some() && !kind.unknown_keys(data).is_empty() {
            let id = self.build_node(kind, &Value::Null, parent, Check::KeysOnly)?;
            let id = match self.apply(id, raw) {
                Ok(id) => id,
                Err(e) => {
                    self.discard(id);
                    return Err(e);
                }
            };
            self.mark_original(id)?;
            return Ok(id);
        }

        let id = self.attach(kind.clone(), parent);
        match self.fill(id, kind, data, check) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.discard(id);
                Err(e)
            }
        }
    }

    fn fill(&mut self, id: NodeId, kind: &Arc<MapperKind>, data: &Map<String, Value>, check: Check) -> Result<()> {
        if !kind.options().allow_unknown {
            kind.check_keys(data, &self.path(id)?)?;
        }

        for (field, raw) in data {
            match kind.shape(field) {
                Some(shape) => {
                    let value = self.parse_field(id, field, shape, raw, check)?;
                    self.set_value(id, field, value)?;
                }
                None => {
                    self.node_mut(id)?.unknown.insert(field.clone(), raw.clone());
                }
            }
        }

        if check == Check::Full {
            self.check_schema(id, kind)?;
        }
        Ok(())
    }

    /// Strict mode: every declared field must be present. Otherwise at least
    /// `similarity` percent of the declared fields must be.
    fn check_schema(&self, id: NodeId, kind: &MapperKind) -> Result<()> {
        let values = &self.node(id)?.values;
        let total = kind.table().len();
        let unfilled: Vec<&str> = kind
            .table()
            .keys()
            .filter(|field| !values.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();
        let filled = total - unfilled.len();

        let options = kind.options();
        let reason = if options.strict_check {
            if unfilled.is_empty() {
                return Ok(());
            }
            format!("unfilled parameters: {unfilled:?}")
        } else {
            if total == 0 || filled * 100 >= usize::from(options.similarity) * total {
                return Ok(());
            }
            format!("data does not look like {kind}, too few fields filled in ({filled} of {total})")
        };
        Err(MapperError::Validation {
            kind: kind.name().to_string(),
            path: self.path(id)?,
            reason,
        })
    }

    pub(super) fn parse_field(
        &mut self,
        id: NodeId,
        field: &str,
        shape: &TypeShape,
        raw: &Value,
        check: Check,
    ) -> Result<FieldValue> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }
        match shape {
            TypeShape::Leaf(leaf) => self.parse_leaf(id, field, leaf, raw, false, check),
            TypeShape::Union(leaves) => self.select_leaf(id, field, leaves, raw, check),
            TypeShape::List(inner) => self.parse_list(id, field, inner.alternatives(), raw, check),
        }
    }

    /// Build one leaf value. `selective` is set while choosing between
    /// alternatives: a `bool` then needs a real boolean and a kind needs a
    /// record it would accept. Child instances get the same `check`.
    fn parse_leaf(
        &mut self,
        id: NodeId,
        field: &str,
        leaf: &Leaf,
        raw: &Value,
        selective: bool,
        check: Check,
    ) -> Result<FieldValue> {
        match leaf {
            Leaf::Bool if selective => raw
                .as_bool()
                .map(FieldValue::Bool)
                .ok_or_else(|| self.unsupported(id, field, raw, "expected a boolean")),
            Leaf::Bool => Ok(FieldValue::Bool(truthy(raw))),
            Leaf::Adapter(adapter) => ScalarValue::from_raw(adapter, raw)
                .map(FieldValue::Scalar)
                .map_err(|e| self.unsupported(id, field, raw, e.to_string())),
            Leaf::Kind(kind_ref) => {
                let kind = kind_ref.get()?;
                if !raw.is_object() {
                    return Err(self.unsupported(id, field, raw, format!("expected a {} record", kind.name())));
                }
                if selective && !accepts_record(&kind, raw) {
                    return Err(self.unsupported(id, field, raw, format!("record is not compatible with {}", kind.name())));
                }
                let child = self.build_node(&kind, raw, Some((id, field)), check)?;
                Ok(FieldValue::Node(child))
            }
            Leaf::Forward(name) => Err(MapperError::definition(name, "forward reference was never resolved")),
        }
    }

    /// First alternative, in declaration order, that accepts `raw`.
    pub(super) fn select_leaf(
        &mut self,
        id: NodeId,
        field: &str,
        leaves: &[Leaf],
        raw: &Value,
        check: Check,
    ) -> Result<FieldValue> {
        for leaf in leaves {
            match self.parse_leaf(id, field, leaf, raw, true, check) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() => {
                    debug!(field, alternative = ?leaf, error = %e, "skipped alternative");
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.unsupported(id, field, raw, "no declared alternative accepts the value"))
    }

    fn parse_list(&mut self, id: NodeId, field: &str, leaves: &[Leaf], raw: &Value, check: Check) -> Result<FieldValue> {
        let items = match raw.as_array() {
            Some(items) => items,
            None => return Err(self.wrong_type(id, field, raw, "expected a list")),
        };

        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if item.is_null() {
                values.push(FieldValue::Null);
                continue;
            }
            match self.select_leaf(id, field, leaves, item, check) {
                Ok(value) => values.push(value),
                Err(e) => {
                    self.discard_value(&FieldValue::List(values));
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    return Err(self.wrong_type(id, field, item, format!("can not select type for item: {e}")));
                }
            }
        }
        Ok(FieldValue::List(values))
    }

    pub(super) fn unsupported(&self, id: NodeId, field: &str, raw: &Value, reason: impl Into<String>) -> MapperError {
        MapperError::UnsupportedType {
            kind: self.kind_name(id),
            field: field.to_string(),
            path: self.field_path(id, field),
            value: truncate_value(raw),
            reason: reason.into(),
        }
    }

    pub(super) fn wrong_type(&self, id: NodeId, field: &str, raw: &Value, reason: impl Into<String>) -> MapperError {
        MapperError::WrongType {
            kind: self.kind_name(id),
            field: field.to_string(),
            path: self.field_path(id, field),
            value: truncate_value(raw),
            reason: reason.into(),
        }
    }

    fn kind_name(&self, id: NodeId) -> String {
        self.kind_of(id)
            .map(|kind| kind.name().to_string())
            .unwrap_or_default()
    }
}

/// Whether a record may be tried against `kind` while selecting alternatives.
pub(super) fn accepts_record(kind: &MapperKind, raw: &Value) -> bool {
    if kind.options().identify_path.is_none() && kind.options().allow_unknown {
        return raw.is_object();
    }
    kind.is_compat(raw)
}
