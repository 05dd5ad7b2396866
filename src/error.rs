//! Error types for schema compilation and mapping

use thiserror::Error;

use crate::adapter::RawKind;

/// Result type for mapper operations
pub type Result<T> = std::result::Result<T, MapperError>;

/// Longest rendering of an offending value kept in an error message
const MAX_VALUE_LEN: usize = 200;

/// Mapper errors
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Unsupported shape for property {field} of {owner}: {reason}")]
    UnsupportedShape {
        owner: String,
        field: String,
        reason: String,
    },

    #[error("Schema definition error in {kind}: {reason}")]
    SchemaDefinition { kind: String, reason: String },

    #[error("Validation failed for {kind} at {path}: {reason}")]
    Validation {
        kind: String,
        path: String,
        reason: String,
    },

    #[error("Unsupported type of {field} in {kind} at {path}: value {value} ({reason})")]
    UnsupportedType {
        kind: String,
        field: String,
        path: String,
        value: String,
        reason: String,
    },

    #[error("Wrong type of {field} in {kind} at {path}: value {value} ({reason})")]
    WrongType {
        kind: String,
        field: String,
        path: String,
        value: String,
        reason: String,
    },

    #[error("Property \"{field}\" of {kind} {reason}")]
    Key {
        kind: String,
        field: String,
        reason: &'static str,
    },

    #[error("Only instances of the same kind can be compared: {left} vs {right}")]
    KindMismatch { left: String, right: String },

    #[error("Kind not found: {name}{}", suggestion_suffix(.suggestion))]
    UnknownKind {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Kind already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown mapper node: {0}")]
    UnknownNode(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl MapperError {
    /// Errors a caller may recover from by trying another alternative or kind.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MapperError::Validation { .. }
                | MapperError::UnsupportedType { .. }
                | MapperError::WrongType { .. }
        )
    }

    /// Errors raised while a kind is being defined.
    pub fn is_schema_definition(&self) -> bool {
        matches!(
            self,
            MapperError::UnsupportedShape { .. } | MapperError::SchemaDefinition { .. }
        )
    }

    pub(crate) fn shape(owner: &str, field: &str, reason: impl Into<String>) -> Self {
        MapperError::UnsupportedShape {
            owner: owner.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn definition(kind: &str, reason: impl Into<String>) -> Self {
        MapperError::SchemaDefinition {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by scalar type adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("{adapter} does not accept {kind} values")]
    Rejected { adapter: String, kind: RawKind },

    #[error("{adapter} can not parse {value}: {reason}")]
    Invalid {
        adapter: String,
        value: String,
        reason: String,
    },
}

impl AdapterError {
    pub(crate) fn invalid(adapter: &str, value: &serde_json::Value, reason: impl ToString) -> Self {
        AdapterError::Invalid {
            adapter: adapter.to_string(),
            value: truncate_value(value),
            reason: reason.to_string(),
        }
    }
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean {s}?)"))
        .unwrap_or_default()
}

/// Render a raw value for an error message, cut to a readable length.
pub(crate) fn truncate_value(value: &serde_json::Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_VALUE_LEN {
        return rendered;
    }
    let cut: String = rendered.chars().take(MAX_VALUE_LEN).collect();
    format!("{cut} ...")
}
