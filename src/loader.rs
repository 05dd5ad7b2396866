//! Schema Document Loading
//!
//! Kinds can be declared in JSON or TOML documents instead of code:
//!
//! ```json
//! {
//!   "kinds": [
//!     {
//!       "name": "Category",
//!       "key_field": "id",
//!       "fields": {
//!         "id": "int",
//!         "title": "str",
//!         "tags": ["str"],
//!         "parent": "Category",
//!         "value": {"one_of": ["int", "str"]}
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! A field type is an adapter name, `bool`, a kind name, `[inner]` for a
//! list or `{"one_of": [...]}` for an alternation. Kinds of one batch are
//! compiled in dependency order; references between different kinds may not
//! form a cycle (a kind may only refer to itself).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{MapperError, Result};
use crate::registry::KindRegistry;
use crate::schema::{Interface, KindDef, MapperKind};
use crate::shape::DeclaredType;

/// A schema document: a batch of kind declarations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub kinds: Vec<KindSpec>,
}

/// One declared kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindSpec {
    pub name: String,

    /// Compiled kinds this one inherits from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,

    #[serde(default)]
    pub fields: IndexMap<String, Value>,

    /// Fixed values; a same-named field is not mapped
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub constants: IndexMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identify_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_unknown: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_check: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u8>,

    /// Type given to keys outside the declared fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic: Option<Value>,
}

impl KindSpec {
    /// Every type name this declaration mentions.
    fn references(&self) -> HashSet<String> {
        let mut names: HashSet<String> = self.extends.iter().cloned().collect();
        for spec in self.fields.values().chain(self.magic.iter()) {
            collect_names(spec, &mut names);
        }
        names
    }
}

fn collect_names(spec: &Value, names: &mut HashSet<String>) {
    match spec {
        Value::String(name) => {
            names.insert(name.clone());
        }
        Value::Array(items) => items.iter().for_each(|item| collect_names(item, names)),
        Value::Object(map) => map.values().for_each(|item| collect_names(item, names)),
        _ => {}
    }
}

/// Document syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(DocumentFormat::Json),
            Some("toml") => Some(DocumentFormat::Toml),
            _ => None,
        }
    }
}

/// Parse a document from text.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<SchemaDocument> {
    Ok(match format {
        DocumentFormat::Json => serde_json::from_str(text)?,
        DocumentFormat::Toml => toml::from_str(text)?,
    })
}

/// Read one document file; the format follows the extension.
pub fn load_file(path: &Path) -> Result<SchemaDocument> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        MapperError::definition(
            &path.display().to_string(),
            "schema documents must be .json or .toml files",
        )
    })?;
    let text = fs::read_to_string(path)?;
    parse_document(&text, format)
}

/// Schema document files under `paths`. Directories are walked recursively;
/// files inside them are returned in path order.
pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("schema path not found: {}", path.display()),
            )
            .into());
        }
        let mut found: Vec<PathBuf> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && DocumentFormat::from_path(p).is_some())
            .collect();
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

impl KindRegistry {
    /// Compile and register every kind of a document.
    pub fn load_document(&mut self, document: &SchemaDocument) -> Result<Vec<Arc<MapperKind>>> {
        let order = self.compile_order(&document.kinds)?;
        let mut compiled = Vec::with_capacity(order.len());
        for spec in order {
            let def = self.kind_def(spec)?;
            let kind = self.define(def)?;
            debug!(kind = %kind, "loaded kind");
            compiled.push(kind);
        }
        Ok(compiled)
    }

    /// Load every document found under `paths` as one batch.
    pub fn load_paths(&mut self, paths: &[PathBuf]) -> Result<Vec<Arc<MapperKind>>> {
        let files = discover(paths)?;
        let mut batch = SchemaDocument::default();
        for file in &files {
            batch.kinds.extend(load_file(file)?.kinds);
        }
        let kinds = self.load_document(&batch)?;
        info!(files = files.len(), kinds = kinds.len(), "loaded schema documents");
        Ok(kinds)
    }

    /// Order declarations so every kind comes after the kinds it mentions.
    fn compile_order<'a>(&self, specs: &'a [KindSpec]) -> Result<Vec<&'a KindSpec>> {
        let mut graph: DiGraph<&'a KindSpec, ()> = DiGraph::with_capacity(specs.len(), specs.len() * 2);
        let mut indices = HashMap::with_capacity(specs.len());
        for spec in specs {
            if indices.contains_key(spec.name.as_str()) {
                return Err(MapperError::AlreadyRegistered(spec.name.clone()));
            }
            indices.insert(spec.name.as_str(), graph.add_node(spec));
        }
        for spec in specs {
            let target = indices[spec.name.as_str()];
            for name in spec.references() {
                if name == spec.name {
                    continue;
                }
                if let Some(&source) = indices.get(name.as_str()) {
                    graph.add_edge(source, target, ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|idx| graph[idx]).collect()),
            Err(cycle) => {
                let members: Vec<String> = kosaraju_scc(&graph)
                    .into_iter()
                    .find(|scc| scc.contains(&cycle.node_id()))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|idx| graph[idx].name.clone())
                    .collect();
                Err(MapperError::definition(
                    &graph[cycle.node_id()].name,
                    format!("kinds reference each other in a cycle: {members:?}; only self-references are supported"),
                ))
            }
        }
    }

    fn kind_def(&self, spec: &KindSpec) -> Result<KindDef> {
        let mut def = KindDef::new(&spec.name);
        for base in &spec.extends {
            def = def.extends(self.get(base)?);
        }

        let mut interface = Interface::new(format!("I{}", spec.name));
        for (field, declared) in &spec.fields {
            interface = interface.field(field, self.declared_type(&spec.name, declared)?);
        }
        for (name, value) in &spec.constants {
            interface = interface.constant(name, value.clone());
        }
        def = def.implements(interface);

        if let Some(key_field) = &spec.key_field {
            def = def.key_field(key_field);
        }
        if let Some(path) = &spec.identify_path {
            def = def.identify_path(path);
        }
        if let Some(allow) = spec.allow_unknown {
            def = def.allow_unknown(allow);
        }
        if let Some(strict) = spec.strict_check {
            def = def.strict_check(strict);
        }
        if let Some(similarity) = spec.similarity {
            def = def.similarity(similarity);
        }
        if let Some(magic) = &spec.magic {
            def = def.magic(self.declared_type(&spec.name, magic)?);
        }
        Ok(def)
    }

    /// Turn a field type from a document into a declared type. Shapes the
    /// validator rejects are passed through so it can explain why.
    fn declared_type(&self, owner: &str, spec: &Value) -> Result<DeclaredType> {
        match spec {
            Value::Null => Ok(DeclaredType::Null),
            Value::String(name) => match name.as_str() {
                "dict" | "map" | "object" => Ok(DeclaredType::Map),
                "list" | "array" => Ok(DeclaredType::List(Vec::new())),
                "callable" | "function" => Ok(DeclaredType::Callable(name.clone())),
                _ if name == owner => Ok(DeclaredType::forward(name.clone())),
                _ => self.resolve_type(name).ok_or_else(|| {
                    MapperError::definition(owner, format!("unknown type {name:?}"))
                }),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.declared_type(owner, item))
                .collect::<Result<Vec<_>>>()
                .map(DeclaredType::List),
            Value::Object(map) => {
                if let Some(Value::Array(members)) = map.get("one_of") {
                    return members
                        .iter()
                        .map(|member| self.declared_type(owner, member))
                        .collect::<Result<Vec<_>>>()
                        .map(DeclaredType::Union);
                }
                if let Some(Value::Object(fields)) = map.get("fields") {
                    let mut record = IndexMap::with_capacity(fields.len());
                    for (name, declared) in fields {
                        record.insert(name.clone(), self.declared_type(owner, declared)?);
                    }
                    return Ok(DeclaredType::Record(record));
                }
                Err(MapperError::definition(
                    owner,
                    format!("unrecognized field declaration {spec}"),
                ))
            }
            other => Err(MapperError::definition(
                owner,
                format!("unrecognized field declaration {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    const JSON_DOC: &str = r#"{
        "kinds": [
            {
                "name": "Shelf",
                "fields": {"label": "str", "books": ["Book"]}
            },
            {
                "name": "Book",
                "key_field": "isbn",
                "fields": {"isbn": "str", "pages": "int", "sequel": "Book"}
            }
        ]
    }"#;

    const TOML_DOC: &str = r#"
        [[kinds]]
        name = "Reader"
        extends = ["Person"]
        similarity = 0

        [kinds.fields]
        favourite = { one_of = ["int", "str"] }
        active = "bool"

        [[kinds]]
        name = "Person"
        [kinds.fields]
        name = "str"
    "#;

    #[test]
    fn test_dependency_order() {
        let mut registry = KindRegistry::new();
        let document = parse_document(JSON_DOC, DocumentFormat::Json).unwrap();
        let kinds = registry.load_document(&document).unwrap();

        let names: Vec<_> = kinds.iter().map(|k| k.name().to_string()).collect();
        assert_eq!(names, vec!["Book", "Shelf"]);
        assert_eq!(
            registry.get("Book").unwrap().options().key_field.as_deref(),
            Some("isbn")
        );
    }

    #[test]
    fn test_toml_documents_and_inheritance() {
        let mut registry = KindRegistry::new();
        let document = parse_document(TOML_DOC, DocumentFormat::Toml).unwrap();
        registry.load_document(&document).unwrap();

        let reader = registry.get("Reader").unwrap();
        assert_eq!(reader.table().len(), 3);
        assert!(reader.is_a(registry.get("Person").unwrap()));
        assert_eq!(reader.options().similarity, 0);
    }

    #[test]
    fn test_cross_kind_cycle_is_rejected() {
        let document = SchemaDocument {
            kinds: vec![
                KindSpec {
                    name: "A".into(),
                    fields: [("b".to_string(), json!("B"))].into_iter().collect(),
                    ..KindSpec::default()
                },
                KindSpec {
                    name: "B".into(),
                    fields: [("a".to_string(), json!("A"))].into_iter().collect(),
                    ..KindSpec::default()
                },
            ],
        };
        let err = KindRegistry::new().load_document(&document).unwrap_err();
        assert!(err.is_schema_definition());
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejected_field_shapes() {
        for declared in [json!(null), json!("dict"), json!("list"), json!([]), json!({"fields": {"x": "int"}})] {
            let document = SchemaDocument {
                kinds: vec![KindSpec {
                    name: "Bad".into(),
                    fields: [("field".to_string(), declared.clone())].into_iter().collect(),
                    ..KindSpec::default()
                }],
            };
            let err = KindRegistry::new().load_document(&document).unwrap_err();
            assert!(
                matches!(err, MapperError::UnsupportedShape { .. }),
                "{declared} should be rejected, got {err}"
            );
        }

        let unknown = SchemaDocument {
            kinds: vec![KindSpec {
                name: "Bad".into(),
                fields: [("field".to_string(), json!("Nope"))].into_iter().collect(),
                ..KindSpec::default()
            }],
        };
        assert!(KindRegistry::new().load_document(&unknown).is_err());
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::File::create(dir.path().join("library.json"))
            .unwrap()
            .write_all(JSON_DOC.as_bytes())
            .unwrap();
        fs::File::create(nested.join("readers.toml"))
            .unwrap()
            .write_all(TOML_DOC.as_bytes())
            .unwrap();
        fs::File::create(dir.path().join("notes.txt"))
            .unwrap()
            .write_all(b"ignored")
            .unwrap();

        let mut registry = KindRegistry::new();
        let kinds = registry.load_paths(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(kinds.len(), 4);
        assert!(registry.contains("Reader"));

        let missing = registry.load_paths(&[dir.path().join("missing")]);
        assert!(matches!(missing, Err(MapperError::Io(_))));
    }
}
