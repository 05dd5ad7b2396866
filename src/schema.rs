//! Schema declarations and compiled mapper kinds

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{MapperError, Result};
use crate::mapper::FieldValue;
use crate::shape::{DeclaredType, TypeShape};

/// Default percentage of declared fields a record must fill
pub const DEFAULT_SIMILARITY: u8 = 50;

/// Compiled attribute table: field name -> resolved shape
pub type AttributeTable = IndexMap<String, TypeShape>;

/// Computed accessor for a field; receives the stored value.
pub type Getter = Arc<dyn Fn(&FieldValue) -> FieldValue + Send + Sync>;

/// An interface declaration: named, typed fields plus constants.
#[derive(Clone, Debug, Default)]
pub struct Interface {
    name: String,
    fields: IndexMap<String, DeclaredType>,
    constants: IndexMap<String, Value>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Start from another interface's declarations; later fields override.
    pub fn inherit(mut self, parent: &Interface) -> Self {
        for (name, declared) in &parent.fields {
            self.fields.insert(name.clone(), declared.clone());
        }
        for (name, value) in &parent.constants {
            self.constants.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, declared: impl Into<DeclaredType>) -> Self {
        self.fields.insert(name.into(), declared.into());
        self
    }

    /// A value fixed on the interface itself. A same-named field is not mapped.
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &IndexMap<String, DeclaredType> {
        &self.fields
    }

    pub fn constants(&self) -> &IndexMap<String, Value> {
        &self.constants
    }
}

/// A base a kind is defined from
#[derive(Clone, Debug)]
pub enum Base {
    /// Already compiled kind; its table is inherited wholesale
    Kind(Arc<MapperKind>),
    /// Interface declaration compiled into this kind
    Interface(Interface),
}

/// Dotted lookup into raw data that must equal a fixed literal (`a.b:value`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifyPath {
    pub path: Vec<String>,
    pub literal: String,
}

impl IdentifyPath {
    pub fn parse(spec: &str) -> Option<Self> {
        let (path, literal) = spec.rsplit_once(':')?;
        Some(Self {
            path: path.split('.').map(str::to_string).collect(),
            literal: literal.to_string(),
        })
    }

    /// Whether `data` carries the literal at the path.
    pub fn matches(&self, data: &Value) -> bool {
        if self.literal.is_empty() {
            return false;
        }
        let mut current = data;
        for part in &self.path {
            match current.as_object().and_then(|m| m.get(part)) {
                Some(Value::Null) | None => return false,
                Some(next) => current = next,
            }
        }
        match current {
            Value::String(s) => *s == self.literal,
            Value::Number(_) | Value::Bool(_) => current.to_string() == self.literal,
            _ => false,
        }
    }
}

impl fmt::Display for IdentifyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.join("."), self.literal)
    }
}

/// Kind-wide behaviour switches
#[derive(Clone, Debug, PartialEq)]
pub struct KindOptions {
    pub key_field: Option<String>,
    pub identify_path: Option<IdentifyPath>,
    pub allow_unknown: bool,
    pub strict_check: bool,
    pub similarity: u8,
}

impl Default for KindOptions {
    fn default() -> Self {
        Self {
            key_field: None,
            identify_path: None,
            allow_unknown: false,
            strict_check: false,
            similarity: DEFAULT_SIMILARITY,
        }
    }
}

/// Option values a definition sets explicitly
#[derive(Clone, Debug, Default)]
pub struct OptionOverrides {
    pub key_field: Option<String>,
    pub identify_path: Option<String>,
    pub allow_unknown: Option<bool>,
    pub strict_check: Option<bool>,
    pub similarity: Option<u8>,
}

/// How a field is read
#[derive(Clone)]
pub enum Accessor {
    Stored,
    Computed(Getter),
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Stored => f.write_str("Stored"),
            Accessor::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Everything needed to compile one concrete kind
#[derive(Clone, Default)]
pub struct KindDef {
    pub(crate) name: String,
    pub(crate) bases: Vec<Base>,
    pub(crate) getters: IndexMap<String, Getter>,
    pub(crate) options: OptionOverrides,
    pub(crate) magic: Option<DeclaredType>,
}

impl KindDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn extends(mut self, kind: &Arc<MapperKind>) -> Self {
        self.bases.push(Base::Kind(kind.clone()));
        self
    }

    pub fn implements(mut self, interface: Interface) -> Self {
        self.bases.push(Base::Interface(interface));
        self
    }

    pub fn getter<F>(mut self, field: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&FieldValue) -> FieldValue + Send + Sync + 'static,
    {
        self.getters.insert(field.into(), Arc::new(getter));
        self
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.options.key_field = Some(field.into());
        self
    }

    pub fn identify_path(mut self, spec: impl Into<String>) -> Self {
        self.options.identify_path = Some(spec.into());
        self
    }

    pub fn allow_unknown(mut self, allow: bool) -> Self {
        self.options.allow_unknown = Some(allow);
        self
    }

    pub fn strict_check(mut self, strict: bool) -> Self {
        self.options.strict_check = Some(strict);
        self
    }

    pub fn similarity(mut self, percent: u8) -> Self {
        self.options.similarity = Some(percent);
        self
    }

    /// Shape given to keys outside the table (see `MapperGraph::apply`).
    pub fn magic(mut self, declared: impl Into<DeclaredType>) -> Self {
        self.magic = Some(declared.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile with the default kind options.
    pub fn compile(self) -> Result<Arc<MapperKind>> {
        crate::compiler::compile(self)
    }
}

/// A compiled mapper kind. Shared read-only by all of its instances.
pub struct MapperKind {
    pub(crate) name: String,
    /// Own name first, then every ancestor kind name
    pub(crate) lineage: Vec<String>,
    pub(crate) table: AttributeTable,
    pub(crate) accessors: IndexMap<String, Accessor>,
    pub(crate) constants: IndexMap<String, Value>,
    pub(crate) options: KindOptions,
    pub(crate) magic: Option<TypeShape>,
    /// Compiled kinds this one inherits from
    pub(crate) bases: Vec<Arc<MapperKind>>,
    /// Kind this one was derived from at runtime; keeps it alive
    pub(crate) origin: Option<Arc<MapperKind>>,
    pub(crate) derived: AtomicUsize,
}

impl MapperKind {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    pub fn shape(&self, field: &str) -> Option<&TypeShape> {
        self.table.get(field)
    }

    pub fn accessor(&self, field: &str) -> Option<&Accessor> {
        self.accessors.get(field)
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn options(&self) -> &KindOptions {
        &self.options
    }

    pub fn magic_shape(&self) -> Option<&TypeShape> {
        self.magic.as_ref()
    }

    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Whether this kind is `other` or was compiled/derived from it.
    /// Kinds are compared by identity, so a separately compiled kind that
    /// happens to share a name is unrelated.
    pub fn is_a(&self, other: &MapperKind) -> bool {
        std::ptr::eq(self, other)
            || self
                .origin
                .iter()
                .chain(&self.bases)
                .any(|parent| parent.is_a(other))
    }

    /// Keys of `data` that are not in the attribute table.
    pub fn unknown_keys<'a>(&self, data: &'a Map<String, Value>) -> Vec<&'a str> {
        data.keys()
            .filter(|k| !self.table.contains_key(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Check that every key of `data` is declared.
    pub fn validate_keys(&self, data: &Map<String, Value>) -> Result<()> {
        self.check_keys(data, &self.name)
    }

    pub(crate) fn check_keys(&self, data: &Map<String, Value>, path: &str) -> Result<()> {
        let unknown = self.unknown_keys(data);
        if unknown.is_empty() {
            return Ok(());
        }
        Err(MapperError::Validation {
            kind: self.name.clone(),
            path: path.to_string(),
            reason: format!(
                "data contains unknown keys: {:?}; data keys: {:?}",
                unknown,
                data.keys().collect::<Vec<_>>()
            ),
        })
    }

    /// Identify a record by the declared identification path.
    /// Always false when the kind declares none.
    pub fn identify(&self, data: &Value) -> bool {
        self.options
            .identify_path
            .as_ref()
            .map(|path| path.matches(data))
            .unwrap_or(false)
    }

    /// Whether a raw record looks like an instance of this kind.
    pub fn is_compat(&self, data: &Value) -> bool {
        if self.options.identify_path.is_some() {
            return self.identify(data);
        }
        match data.as_object() {
            Some(map) => self.unknown_keys(map).is_empty(),
            None => false,
        }
    }

    pub(crate) fn next_derived_name(&self) -> String {
        let n = self.derived.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}", self.name, n)
    }
}

impl fmt::Debug for MapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperKind")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("options", &self.options)
            .finish()
    }
}

impl fmt::Display for MapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
