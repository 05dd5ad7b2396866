//! Numeric adapters

use serde_json::{Number, Value};

use super::{RawKind, Scalar, ScalarAdapter};
use crate::error::AdapterError;

/// Integer adapter. Only integral JSON numbers are accepted; numeric
/// strings fall through to the next alternative.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int;

impl ScalarAdapter for Int {
    fn name(&self) -> &str {
        "int"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::Integer]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        raw.as_i64()
            .map(Scalar::Integer)
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "out of i64 range"))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Integer(i) => Value::from(*i),
            _ => Value::Null,
        }
    }
}

/// Floating point adapter; accepts numbers and numeric strings.
/// Non-finite values are rejected since they have no JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float;

impl ScalarAdapter for Float {
    fn name(&self) -> &str {
        "float"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::Float, RawKind::Integer, RawKind::String]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let value = match raw {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| AdapterError::invalid(self.name(), raw, "not representable as f64"))?,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| AdapterError::invalid(self.name(), raw, e))?,
            other => return Err(AdapterError::invalid(self.name(), other, "not a number")),
        };
        if !value.is_finite() {
            return Err(AdapterError::invalid(self.name(), raw, "not a finite number"));
        }
        Ok(Scalar::Float(value))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}
