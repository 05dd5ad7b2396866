//! Property Mapper
//!
//! Maps loosely-typed records (JSON-like maps, lists and scalars) onto typed
//! object graphs described by declarative schemas, and merges later records
//! onto existing graphs while tracking what changed.
//!
//! ## Features
//!
//! - **Schema Compilation**: Kinds are declared from interfaces, inherited
//!   kinds and options, and compiled once into an attribute table
//! - **Scalar Adapters**: Pluggable converters between raw scalars and typed values
//! - **Alternation**: Union fields try each declared alternative in order
//! - **Incremental Merge**: Nested instances are updated in place so their
//!   identity survives repeated merges
//! - **Runtime Extension**: Instances can grow or lose fields through derived kinds
//!
//! ## Architecture
//!
//! ```text
//! KindDef ──compile──> MapperKind ──┐
//!                                   │
//! raw record ──construct──> MapperGraph (arena of MapperNode)
//!                               │   ▲
//!                          to_raw   merge / apply / add_properties
//! ```

pub mod adapter;
pub mod compiler;
pub mod config;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod registry;
pub mod schema;
pub mod shape;

pub use adapter::{adapter, AdapterRef, AdapterSet, RawKind, Scalar, ScalarAdapter, ScalarValue};
pub use compiler::{compile, compile_with};
pub use config::{MapperConfig, OutputFormat};
pub use error::{AdapterError, MapperError, Result};
pub use loader::{KindSpec, SchemaDocument};
pub use mapper::{FieldValue, MapperGraph, MapperNode, NodeId, RawOptions};
pub use registry::KindRegistry;
pub use schema::{IdentifyPath, Interface, KindDef, KindOptions, MapperKind};
pub use shape::{DeclaredType, TypeShape};
