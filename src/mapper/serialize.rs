//! Serialization of mapper instances back to raw records

use serde_json::{Map, Value};

use super::{FieldValue, MapperGraph, NodeId};
use crate::error::Result;

/// Options for [`MapperGraph::to_raw_with`]
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    /// Fold unknown params back into every record
    pub include_unknown: bool,
    /// Only emit these top-level fields
    pub only: Option<Vec<String>>,
}

impl RawOptions {
    pub fn with_unknown() -> Self {
        Self {
            include_unknown: true,
            only: None,
        }
    }
}

impl MapperGraph {
    /// Serialize an instance: declared fields only, null values omitted.
    pub fn to_raw(&self, id: NodeId) -> Result<Value> {
        self.to_raw_with(id, &RawOptions::default())
    }

    pub fn to_raw_with(&self, id: NodeId, options: &RawOptions) -> Result<Value> {
        let node = self.node(id)?;
        let mut record = Map::new();
        for field in node.kind.table().keys() {
            if let Some(only) = &options.only {
                if !only.iter().any(|name| name == field) {
                    continue;
                }
            }
            let value = self.value_to_raw(&self.get(id, field)?, options.include_unknown)?;
            if !value.is_null() {
                record.insert(field.clone(), value);
            }
        }
        if options.include_unknown {
            for (key, value) in &node.unknown {
                record.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(Value::Object(record))
    }

    pub(super) fn value_to_raw(&self, value: &FieldValue, include_unknown: bool) -> Result<Value> {
        Ok(match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Scalar(scalar) => scalar.reverse(),
            FieldValue::Node(child) => self.to_raw_with(
                *child,
                &RawOptions {
                    include_unknown,
                    only: None,
                },
            )?,
            FieldValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.value_to_raw(item, include_unknown))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}
