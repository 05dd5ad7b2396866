//! UUID adapter

use serde_json::Value;

use super::{RawKind, Scalar, ScalarAdapter};
use crate::error::AdapterError;

/// Accepts hyphenated or simple-form UUID strings
#[derive(Debug, Clone, Copy, Default)]
pub struct Uuid;

impl ScalarAdapter for Uuid {
    fn name(&self) -> &str {
        "uuid"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::String]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let text = raw
            .as_str()
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "not a string"))?;
        ::uuid::Uuid::parse_str(text)
            .map(Scalar::Uuid)
            .map_err(|e| AdapterError::invalid(self.name(), raw, e))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Uuid(id) => Value::String(id.hyphenated().to_string()),
            _ => Value::Null,
        }
    }
}
