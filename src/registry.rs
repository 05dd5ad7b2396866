//! Kind Registry
//!
//! Holds compiled mapper kinds by name together with the adapter set and the
//! kind-option defaults used when compiling new kinds. Schema documents are
//! resolved against it, and it can tell which kinds a raw record looks like.

use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{AdapterRef, AdapterSet};
use crate::compiler;
use crate::error::{MapperError, Result};
use crate::mapper::MapperGraph;
use crate::schema::{KindDef, KindOptions, MapperKind};
use crate::shape::DeclaredType;

/// A fuzzy search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub name: String,
    pub score: i64,
}

/// Registry of compiled mapper kinds
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: IndexMap<String, Arc<MapperKind>>,
    adapters: AdapterSet,
    defaults: KindOptions,
}

impl KindRegistry {
    /// Empty registry with the builtin adapters and default kind options
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: KindOptions) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn defaults(&self) -> &KindOptions {
        &self.defaults
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Make a custom adapter addressable by name.
    pub fn add_adapter(&mut self, adapter: AdapterRef) {
        self.adapters.insert(adapter);
    }

    /// Register an already compiled kind.
    pub fn register(&mut self, kind: Arc<MapperKind>) -> Result<()> {
        if self.kinds.contains_key(kind.name()) {
            return Err(MapperError::AlreadyRegistered(kind.name().to_string()));
        }
        self.kinds.insert(kind.name().to_string(), kind);
        Ok(())
    }

    /// Compile a definition with the registry defaults and register it.
    pub fn define(&mut self, def: KindDef) -> Result<Arc<MapperKind>> {
        if self.kinds.contains_key(def.name()) {
            return Err(MapperError::AlreadyRegistered(def.name().to_string()));
        }
        let kind = compiler::compile_with(def, &self.defaults)?;
        self.register(kind.clone())?;
        Ok(kind)
    }

    /// Look up a kind, suggesting the closest name when it is missing.
    pub fn get(&self, name: &str) -> Result<&Arc<MapperKind>> {
        self.kinds.get(name).ok_or_else(|| MapperError::UnknownKind {
            name: name.to_string(),
            suggestion: self.search(name, 1).into_iter().next().map(|hit| hit.name),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered kind names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Arc<MapperKind>> {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Resolve a type name from a schema document: `bool`, an adapter name
    /// or a registered kind.
    pub fn resolve_type(&self, name: &str) -> Option<DeclaredType> {
        if name == "bool" || name == "boolean" {
            return Some(DeclaredType::Bool);
        }
        if let Some(adapter) = self.adapters.get(name) {
            return Some(DeclaredType::Adapter(adapter.clone()));
        }
        self.kinds.get(name).map(DeclaredType::kind)
    }

    /// Kind names matching `query`, best first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let matcher = SkimMatcherV2::default();
        let mut results: Vec<SearchResult> = self
            .kinds
            .keys()
            .filter_map(|name| {
                matcher.fuzzy_match(name, query).map(|score| SearchResult {
                    name: name.clone(),
                    score,
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score));
        results.truncate(limit);
        results
    }

    /// Names of every registered kind that constructs `raw` without error.
    pub fn identify(&self, raw: &Value) -> Vec<String> {
        self.kinds
            .values()
            .filter(|kind| match MapperGraph::from_raw(kind, raw) {
                Ok(_) => true,
                Err(e) => {
                    debug!(kind = %kind, error = %e, "record does not match kind");
                    false
                }
            })
            .map(|kind| kind.name().to_string())
            .collect()
    }
}
