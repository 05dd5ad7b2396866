//! Scalar Type Adapters
//!
//! Every leaf value type other than nested kinds and `bool` is handled by a
//! [`ScalarAdapter`]. An adapter declares which raw JSON kinds it accepts,
//! parses raw values into a typed [`Scalar`] and reverses it for
//! serialization. The mapper core only ever talks to adapters through
//! [`ScalarValue`], which carries the changed marker produced by `replace`.

mod number;
mod text;
mod time;
mod uuid;

pub use number::{Float, Int};
pub use text::{Any, Discard, Str};
pub use time::{Date, Datetime, Timestamp};
pub use self::uuid::Uuid;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value;

use crate::error::AdapterError;

/// Shared handle to an adapter
pub type AdapterRef = Arc<dyn ScalarAdapter>;

/// Runtime kind of a raw JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl RawKind {
    pub const ALL: &'static [RawKind] = &[
        RawKind::Null,
        RawKind::Bool,
        RawKind::Integer,
        RawKind::Float,
        RawKind::String,
        RawKind::Array,
        RawKind::Object,
    ];

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => RawKind::Null,
            Value::Bool(_) => RawKind::Bool,
            Value::Number(n) if n.is_f64() => RawKind::Float,
            Value::Number(_) => RawKind::Integer,
            Value::String(_) => RawKind::String,
            Value::Array(_) => RawKind::Array,
            Value::Object(_) => RawKind::Object,
        }
    }
}

impl fmt::Display for RawKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RawKind::Null => "null",
            RawKind::Bool => "bool",
            RawKind::Integer => "integer",
            RawKind::Float => "float",
            RawKind::String => "string",
            RawKind::Array => "array",
            RawKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Typed value produced by an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Uuid(::uuid::Uuid),
    /// Raw value kept untouched
    Raw(Value),
    /// Value discarded on purpose
    Nothing,
}

/// The contract every scalar value type satisfies.
pub trait ScalarAdapter: fmt::Debug + Send + Sync {
    /// Name used in schema documents and diagnostics
    fn name(&self) -> &str;

    /// Raw kinds this adapter accepts as input
    fn accepted_kinds(&self) -> &[RawKind];

    /// Convert an accepted raw value into a typed value
    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError>;

    /// Inverse of [`ScalarAdapter::parse`]
    fn reverse(&self, value: &Scalar) -> Value;

    fn accepts(&self, kind: RawKind) -> bool {
        self.accepted_kinds().contains(&kind)
    }

    /// Construction entry point: check the raw kind, then parse.
    fn from_raw(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let kind = RawKind::of(raw);
        if !self.accepts(kind) {
            return Err(AdapterError::Rejected {
                adapter: self.name().to_string(),
                kind,
            });
        }
        self.parse(raw)
    }
}

/// A converted scalar together with the adapter that produced it.
#[derive(Debug, Clone)]
pub struct ScalarValue {
    adapter: AdapterRef,
    value: Scalar,
    changed: bool,
}

impl ScalarValue {
    pub fn from_raw(adapter: &AdapterRef, raw: &Value) -> Result<Self, AdapterError> {
        Ok(Self {
            adapter: adapter.clone(),
            value: adapter.from_raw(raw)?,
            changed: false,
        })
    }

    /// Parse `raw` with the same adapter; the result is marked changed iff it
    /// differs from `self`.
    pub fn replace(&self, raw: &Value) -> Result<Self, AdapterError> {
        let mut next = Self::from_raw(&self.adapter, raw)?;
        next.changed = next.value != self.value;
        Ok(next)
    }

    pub fn reverse(&self) -> Value {
        self.adapter.reverse(&self.value)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn value(&self) -> &Scalar {
        &self.value
    }

    pub fn adapter(&self) -> &AdapterRef {
        &self.adapter
    }

    /// Whether this value was produced by `adapter`.
    pub fn is_from(&self, adapter: &AdapterRef) -> bool {
        same_adapter(&self.adapter, adapter)
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        same_adapter(&self.adapter, &other.adapter) && self.value == other.value
    }
}

pub fn same_adapter(a: &AdapterRef, b: &AdapterRef) -> bool {
    Arc::ptr_eq(a, b) || a.name() == b.name()
}

/// Adapters addressable by name from schema documents
#[derive(Debug, Clone)]
pub struct AdapterSet {
    adapters: HashMap<String, AdapterRef>,
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AdapterSet {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// The builtin adapters, registered under their names and common aliases.
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.insert_as(&["str", "string"], Arc::new(Str));
        set.insert_as(&["int", "integer"], Arc::new(Int));
        set.insert_as(&["float", "number"], Arc::new(Float));
        set.insert_as(&["any"], Arc::new(Any));
        set.insert_as(&["drop"], Arc::new(Discard));
        set.insert_as(&["date"], Arc::new(Date));
        set.insert_as(&["datetime"], Arc::new(Datetime));
        set.insert_as(&["timestamp"], Arc::new(Timestamp));
        set.insert_as(&["uuid"], Arc::new(Uuid));
        set
    }

    pub fn insert(&mut self, adapter: AdapterRef) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    fn insert_as(&mut self, names: &[&str], adapter: AdapterRef) {
        for name in names {
            self.adapters.insert(name.to_string(), adapter.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&AdapterRef> {
        self.adapters.get(name)
    }
}

/// Shorthand for wrapping an adapter into a shared handle.
pub fn adapter<A: ScalarAdapter + 'static>(adapter: A) -> AdapterRef {
    Arc::new(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_kind_detection() {
        assert_eq!(RawKind::of(&json!(5)), RawKind::Integer);
        assert_eq!(RawKind::of(&json!(5.5)), RawKind::Float);
        assert_eq!(RawKind::of(&json!("5")), RawKind::String);
        assert_eq!(RawKind::of(&json!({})), RawKind::Object);
    }

    #[test]
    fn test_replace_marks_changes() {
        let int = adapter(Int);
        let value = ScalarValue::from_raw(&int, &json!(5)).unwrap();
        assert!(!value.is_changed());

        let same = value.replace(&json!(5)).unwrap();
        assert!(!same.is_changed());

        let other = value.replace(&json!(6)).unwrap();
        assert!(other.is_changed());
        assert_eq!(other.reverse(), json!(6));
    }

    #[test]
    fn test_rejected_kind() {
        let int = adapter(Int);
        let err = ScalarValue::from_raw(&int, &json!("5")).unwrap_err();
        assert_eq!(
            err,
            AdapterError::Rejected {
                adapter: "int".into(),
                kind: RawKind::String
            }
        );
    }

    #[test]
    fn test_builtin_lookup_by_alias() {
        let set = AdapterSet::builtin();
        assert_eq!(set.get("string").unwrap().name(), "str");
        assert_eq!(set.get("integer").unwrap().name(), "int");
        assert!(set.get("bool").is_none());
    }
}
