//! Schema Compiler
//!
//! Turns a [`KindDef`] into an immutable [`MapperKind`] in two passes:
//!
//! 1. collect the attribute table from compiled bases and interfaces, validate
//!    every declared shape and leave self-references as `Leaf::Forward`
//! 2. once the kind's identity exists, rewrite every forward name that matches
//!    the kind's own name into a weak reference to the kind itself
//!
//! Pass 2 runs inside `Arc::new_cyclic`, so every check that can fail happens
//! before it.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{MapperError, Result};
use crate::schema::{
    Accessor, AttributeTable, Base, IdentifyPath, KindDef, KindOptions, MapperKind,
};
use crate::shape::{self, KindRef, Leaf, TypeShape};

static KIND_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Compile a kind definition with default kind options.
pub fn compile(def: KindDef) -> Result<Arc<MapperKind>> {
    compile_with(def, &KindOptions::default())
}

/// Compile a kind definition. `defaults` applies to options the kind neither
/// declares nor inherits from a compiled base.
pub fn compile_with(def: KindDef, defaults: &KindOptions) -> Result<Arc<MapperKind>> {
    if !KIND_NAME.is_match(&def.name) {
        return Err(MapperError::definition(
            &def.name,
            "kind names must start with a letter or underscore and contain only alphanumerics",
        ));
    }

    let mut lineage = vec![def.name.clone()];
    let mut bases = Vec::new();
    let mut table = AttributeTable::new();
    let mut accessors: IndexMap<String, Accessor> = IndexMap::new();
    let mut constants: IndexMap<String, Value> = IndexMap::new();
    let mut options: Option<KindOptions> = None;
    let mut magic = None;

    for base in &def.bases {
        match base {
            Base::Kind(parent) => {
                for (name, shape) in &parent.table {
                    table.insert(name.clone(), shape.clone());
                }
                for (name, accessor) in &parent.accessors {
                    accessors.insert(name.clone(), accessor.clone());
                }
                for (name, value) in &parent.constants {
                    constants.insert(name.clone(), value.clone());
                }
                for ancestor in &parent.lineage {
                    if !lineage.contains(ancestor) {
                        lineage.push(ancestor.clone());
                    }
                }
                bases.push(parent.clone());
                if options.is_none() {
                    options = Some(parent.options.clone());
                }
                if magic.is_none() {
                    magic = parent.magic.clone();
                }
            }
            Base::Interface(interface) => {
                for (name, value) in interface.constants() {
                    constants.insert(name.clone(), value.clone());
                }
                for (declared_name, declared) in interface.fields() {
                    let name = declared_name.trim_end_matches('_');
                    if name.is_empty() {
                        return Err(MapperError::definition(
                            &def.name,
                            format!("field name {declared_name:?} is empty once markers are stripped"),
                        ));
                    }
                    if interface.constants().contains_key(name) {
                        continue;
                    }
                    let shape = shape::validate(&def.name, name, declared)?;
                    table.insert(name.to_string(), shape);
                }
            }
        }
    }

    for name in def.getters.keys() {
        if !table.contains_key(name) {
            return Err(MapperError::definition(
                &def.name,
                format!("getter defined for undeclared field {name:?}"),
            ));
        }
    }
    for name in table.keys() {
        match def.getters.get(name) {
            Some(getter) => {
                accessors.insert(name.clone(), Accessor::Computed(getter.clone()));
            }
            None => {
                accessors.entry(name.clone()).or_insert(Accessor::Stored);
            }
        }
    }

    if let Some(declared) = &def.magic {
        magic = Some(shape::validate(&def.name, "*", declared)?);
    }

    let options = apply_overrides(&def, options.unwrap_or_else(|| defaults.clone()), &table)?;

    for (field, shape) in table.iter().chain(magic.iter().map(|m| (&def.name, m))) {
        check_forward_names(&def.name, field, shape)?;
    }

    let name = def.name;
    let kind = Arc::new_cyclic(|weak: &Weak<MapperKind>| {
        let mut resolve = |leaf: &Leaf| match leaf {
            Leaf::Forward(_) => Leaf::Kind(KindRef::Cyclic(weak.clone())),
            other => other.clone(),
        };
        let table = table
            .iter()
            .map(|(field, shape)| (field.clone(), shape.map_leaves(&mut resolve)))
            .collect();
        let magic = magic.as_ref().map(|shape| shape.map_leaves(&mut resolve));
        MapperKind {
            name,
            lineage,
            table,
            accessors,
            constants,
            options,
            magic,
            bases,
            origin: None,
            derived: AtomicUsize::new(0),
        }
    });

    debug!(kind = %kind.name, fields = kind.table.len(), "compiled mapper kind");
    Ok(kind)
}

fn apply_overrides(def: &KindDef, mut options: KindOptions, table: &AttributeTable) -> Result<KindOptions> {
    let overrides = &def.options;
    if let Some(key_field) = &overrides.key_field {
        options.key_field = Some(key_field.clone());
    }
    if let Some(key_field) = &options.key_field {
        if !table.contains_key(key_field) {
            return Err(MapperError::definition(
                &def.name,
                format!("key field {key_field:?} is not a declared field"),
            ));
        }
    }
    if let Some(spec) = &overrides.identify_path {
        let path = IdentifyPath::parse(spec).ok_or_else(|| {
            MapperError::definition(
                &def.name,
                format!("identify path {spec:?} must look like \"a.b:literal\""),
            )
        })?;
        options.identify_path = Some(path);
    }
    if let Some(allow) = overrides.allow_unknown {
        options.allow_unknown = allow;
    }
    if let Some(strict) = overrides.strict_check {
        options.strict_check = strict;
    }
    if let Some(similarity) = overrides.similarity {
        if similarity > 100 {
            return Err(MapperError::definition(
                &def.name,
                format!("similarity must be a percentage, got {similarity}"),
            ));
        }
        options.similarity = similarity;
    }
    Ok(options)
}

fn check_forward_names(kind: &str, field: &str, shape: &TypeShape) -> Result<()> {
    match shape.forward_names().into_iter().find(|name| *name != kind) {
        Some(foreign) => Err(MapperError::definition(
            kind,
            format!("field {field:?} references {foreign:?}; only the kind's own name can be used as a forward reference"),
        )),
        None => Ok(()),
    }
}

/// The kind a chain of runtime derivations started from.
fn derivation_root(kind: &Arc<MapperKind>) -> &Arc<MapperKind> {
    let mut current = kind;
    while let Some(origin) = &current.origin {
        current = origin;
    }
    current
}

/// Derive an anonymous subkind with `added` fields and without `removed` ones.
///
/// Forward names in added shapes must name `origin` (or the kind it was
/// derived from) and resolve to it.
pub(crate) fn derive(
    origin: &Arc<MapperKind>,
    added: &[(String, TypeShape)],
    removed: &[&str],
) -> Result<Arc<MapperKind>> {
    let root = derivation_root(origin);
    let name = root.next_derived_name();

    let mut table = origin.table.clone();
    let mut accessors = origin.accessors.clone();
    for field in removed {
        table.shift_remove(*field);
        accessors.shift_remove(*field);
    }
    for (field, shape) in added {
        let shape = shape.map_leaves(&mut |leaf: &Leaf| match leaf {
            Leaf::Forward(forward) if *forward == origin.name || *forward == root.name => {
                Leaf::Kind(KindRef::Shared(origin.clone()))
            }
            other => other.clone(),
        });
        check_forward_names(&origin.name, field, &shape)?;
        table.insert(field.clone(), shape);
        accessors.insert(field.clone(), Accessor::Stored);
    }

    let mut options = origin.options.clone();
    if let Some(key_field) = &options.key_field {
        if !table.contains_key(key_field) {
            options.key_field = None;
        }
    }

    let mut lineage = vec![name.clone()];
    lineage.extend(origin.lineage.iter().cloned());

    debug!(kind = %name, origin = %origin.name, fields = table.len(), "derived mapper kind");
    Ok(Arc::new(MapperKind {
        name,
        lineage,
        table,
        accessors,
        constants: origin.constants.clone(),
        options,
        magic: origin.magic.clone(),
        bases: Vec::new(),
        origin: Some(origin.clone()),
        derived: AtomicUsize::new(0),
    }))
}
