//! Text and pass-through adapters

use serde_json::Value;

use super::{RawKind, Scalar, ScalarAdapter};
use crate::error::AdapterError;

/// String adapter; scalars of any primitive kind are rendered as text
#[derive(Debug, Clone, Copy, Default)]
pub struct Str;

impl ScalarAdapter for Str {
    fn name(&self) -> &str {
        "str"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::String, RawKind::Bool, RawKind::Integer, RawKind::Float]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        match raw {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Bool(_) | Value::Number(_) => Ok(Scalar::Text(raw.to_string())),
            other => Err(AdapterError::invalid(self.name(), other, "not a primitive")),
        }
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Text(s) => Value::String(s.clone()),
            _ => Value::Null,
        }
    }
}

/// Accepts any raw value and keeps it as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

impl ScalarAdapter for Any {
    fn name(&self) -> &str {
        "any"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        RawKind::ALL
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        Ok(Scalar::Raw(raw.clone()))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Raw(v) => v.clone(),
            _ => Value::Null,
        }
    }
}

/// Accepts any raw value and throws it away.
///
/// Useful to keep large parts of a record out of memory while still
/// declaring the field.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl ScalarAdapter for Discard {
    fn name(&self) -> &str {
        "drop"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        RawKind::ALL
    }

    fn parse(&self, _raw: &Value) -> Result<Scalar, AdapterError> {
        Ok(Scalar::Nothing)
    }

    fn reverse(&self, _value: &Scalar) -> Value {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_str_renders_primitives() {
        assert_eq!(Str.from_raw(&json!("string")).unwrap(), Scalar::Text("string".into()));
        assert_eq!(Str.from_raw(&json!(5)).unwrap(), Scalar::Text("5".into()));
        assert_eq!(Str.from_raw(&json!(true)).unwrap(), Scalar::Text("true".into()));
        assert!(Str.from_raw(&json!({"a": "b"})).is_err());
    }

    #[test]
    fn test_any_keeps_value() {
        let raw = json!({"a": "b"});
        let value = Any.from_raw(&raw).unwrap();
        assert_eq!(Any.reverse(&value), raw);
    }

    #[test]
    fn test_discard_forgets_value() {
        let value = Discard.from_raw(&json!([1, 2, 3])).unwrap();
        assert_eq!(value, Scalar::Nothing);
        assert_eq!(Discard.reverse(&value), Value::Null);
    }
}
