//! Type shapes and the Type-Shape Validator
//!
//! A field is declared with a [`DeclaredType`]. The validator checks it is one
//! of the four legal shapes and turns it into a [`TypeShape`]:
//!
//! - leaf: `bool`, a scalar adapter, or a nested mapper kind
//! - repeated element: a list of exactly one leaf or alternation
//! - alternation: two or more leaves (no lists, no nested alternations)
//! - self-reference: a textual forward name, resolved by the compiler

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::adapter::{same_adapter, AdapterRef, ScalarAdapter};
use crate::error::{MapperError, Result};
use crate::schema::MapperKind;

/// A field type as authored in a declaration, before validation
#[derive(Clone)]
pub enum DeclaredType {
    /// Null-only declaration (rejected)
    Null,
    Bool,
    Adapter(AdapterRef),
    Kind(Arc<MapperKind>),
    /// Textual forward name of the kind being compiled
    Forward(String),
    /// Repeated element with its type arguments; empty means a bare list
    List(Vec<DeclaredType>),
    Union(Vec<DeclaredType>),
    /// Raw unstructured mapping (rejected)
    Map,
    /// A callable (rejected)
    Callable(String),
    /// Directly nested record declaration (rejected)
    Record(IndexMap<String, DeclaredType>),
}

impl DeclaredType {
    pub fn adapter<A: ScalarAdapter + 'static>(adapter: A) -> Self {
        DeclaredType::Adapter(Arc::new(adapter))
    }

    pub fn kind(kind: &Arc<MapperKind>) -> Self {
        DeclaredType::Kind(kind.clone())
    }

    pub fn forward(name: impl Into<String>) -> Self {
        DeclaredType::Forward(name.into())
    }

    pub fn list(inner: DeclaredType) -> Self {
        DeclaredType::List(vec![inner])
    }

    pub fn union(members: impl IntoIterator<Item = DeclaredType>) -> Self {
        DeclaredType::Union(members.into_iter().collect())
    }

    fn is_list(&self) -> bool {
        matches!(self, DeclaredType::List(_))
    }

    fn is_union(&self) -> bool {
        matches!(self, DeclaredType::Union(_))
    }
}

impl From<Arc<MapperKind>> for DeclaredType {
    fn from(kind: Arc<MapperKind>) -> Self {
        DeclaredType::Kind(kind)
    }
}

impl From<&Arc<MapperKind>> for DeclaredType {
    fn from(kind: &Arc<MapperKind>) -> Self {
        DeclaredType::Kind(kind.clone())
    }
}

impl From<AdapterRef> for DeclaredType {
    fn from(adapter: AdapterRef) -> Self {
        DeclaredType::Adapter(adapter)
    }
}

impl fmt::Debug for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Null => f.write_str("None"),
            DeclaredType::Bool => f.write_str("bool"),
            DeclaredType::Adapter(a) => f.write_str(a.name()),
            DeclaredType::Kind(k) => f.write_str(k.name()),
            DeclaredType::Forward(name) => write!(f, "'{name}'"),
            DeclaredType::List(args) => f.debug_tuple("list").field(args).finish(),
            DeclaredType::Union(members) => f.debug_tuple("union").field(members).finish(),
            DeclaredType::Map => f.write_str("dict"),
            DeclaredType::Callable(name) => write!(f, "fn {name}"),
            DeclaredType::Record(fields) => f.debug_map().entries(fields.iter()).finish(),
        }
    }
}

/// Reference from a shape to a nested kind.
///
/// Self-references are weak so a recursive kind does not own itself.
#[derive(Clone)]
pub enum KindRef {
    Shared(Arc<MapperKind>),
    Cyclic(Weak<MapperKind>),
}

impl KindRef {
    pub fn get(&self) -> Result<Arc<MapperKind>> {
        match self {
            KindRef::Shared(kind) => Ok(kind.clone()),
            KindRef::Cyclic(weak) => weak
                .upgrade()
                .ok_or_else(|| MapperError::definition("<dropped>", "self-referenced kind no longer exists")),
        }
    }
}

impl fmt::Debug for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindRef::Shared(kind) => f.write_str(kind.name()),
            KindRef::Cyclic(weak) => match weak.upgrade() {
                Some(kind) => write!(f, "{}(self)", kind.name()),
                None => f.write_str("<self>"),
            },
        }
    }
}

/// A leaf shape
#[derive(Clone, Debug)]
pub enum Leaf {
    Bool,
    Adapter(AdapterRef),
    Kind(KindRef),
    /// Unresolved self-reference; never present in a compiled table
    Forward(String),
}

impl Leaf {
    /// Whether two leaves denote the same type.
    pub fn same_as(&self, other: &Leaf) -> bool {
        match (self, other) {
            (Leaf::Bool, Leaf::Bool) => true,
            (Leaf::Adapter(a), Leaf::Adapter(b)) => same_adapter(a, b),
            (Leaf::Kind(a), Leaf::Kind(b)) => match (a.get(), b.get()) {
                (Ok(a), Ok(b)) => Arc::ptr_eq(&a, &b),
                _ => false,
            },
            (Leaf::Forward(a), Leaf::Forward(b)) => a == b,
            _ => false,
        }
    }
}

/// A validated field shape
#[derive(Clone, Debug)]
pub enum TypeShape {
    Leaf(Leaf),
    /// Ordered sequence; the inner shape is a leaf or an alternation
    List(Box<TypeShape>),
    /// Exactly one of two or more leaves
    Union(Vec<Leaf>),
}

impl TypeShape {
    /// Candidate leaves for a single value, in declaration order.
    pub fn alternatives(&self) -> &[Leaf] {
        match self {
            TypeShape::Leaf(leaf) => std::slice::from_ref(leaf),
            TypeShape::Union(members) => members,
            TypeShape::List(inner) => inner.alternatives(),
        }
    }

    /// Forward names still waiting for resolution.
    pub fn forward_names(&self) -> Vec<&str> {
        self.alternatives()
            .iter()
            .filter_map(|leaf| match leaf {
                Leaf::Forward(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rebuild the shape with every leaf passed through `f`.
    pub fn map_leaves(&self, f: &mut impl FnMut(&Leaf) -> Leaf) -> TypeShape {
        match self {
            TypeShape::Leaf(leaf) => TypeShape::Leaf(f(leaf)),
            TypeShape::List(inner) => TypeShape::List(Box::new(inner.map_leaves(f))),
            TypeShape::Union(members) => TypeShape::Union(members.iter().map(|m| f(m)).collect()),
        }
    }
}

/// Validate a declared field type.
///
/// `owner` and `field` only feed the error message.
pub fn validate(owner: &str, field: &str, declared: &DeclaredType) -> Result<TypeShape> {
    match declared {
        DeclaredType::List(args) => validate_list(owner, field, args),
        DeclaredType::Union(members) => validate_union(owner, field, members).map(TypeShape::Union),
        other => validate_leaf(owner, field, other).map(TypeShape::Leaf),
    }
}

fn validate_leaf(owner: &str, field: &str, declared: &DeclaredType) -> Result<Leaf> {
    match declared {
        DeclaredType::Bool => Ok(Leaf::Bool),
        DeclaredType::Adapter(adapter) => Ok(Leaf::Adapter(adapter.clone())),
        DeclaredType::Kind(kind) => Ok(Leaf::Kind(KindRef::Shared(kind.clone()))),
        DeclaredType::Forward(name) => Ok(Leaf::Forward(name.clone())),
        DeclaredType::Null => Err(MapperError::shape(owner, field, "can not be None")),
        DeclaredType::Map => Err(MapperError::shape(
            owner,
            field,
            "dictionary type is not supported, declare a mapper kind instead",
        )),
        DeclaredType::Callable(name) => Err(MapperError::shape(
            owner,
            field,
            format!("callable {name} is not supported, implement a scalar adapter instead"),
        )),
        DeclaredType::Record(_) => Err(MapperError::shape(
            owner,
            field,
            "nested record declarations are not supported, compile a separate kind",
        )),
        DeclaredType::List(_) | DeclaredType::Union(_) => {
            Err(MapperError::shape(owner, field, format!("{declared:?} is not a leaf type")))
        }
    }
}

fn validate_union(owner: &str, field: &str, members: &[DeclaredType]) -> Result<Vec<Leaf>> {
    if members.len() < 2 {
        return Err(MapperError::shape(
            owner,
            field,
            "alternation needs at least two members",
        ));
    }
    members
        .iter()
        .map(|member| {
            if member.is_list() {
                return Err(MapperError::shape(owner, field, "alternation can not contain a list"));
            }
            if member.is_union() {
                return Err(MapperError::shape(
                    owner,
                    field,
                    "alternation can not contain another alternation",
                ));
            }
            validate_leaf(owner, field, member)
        })
        .collect()
}

fn validate_list(owner: &str, field: &str, args: &[DeclaredType]) -> Result<TypeShape> {
    let inner = match args {
        [] => {
            return Err(MapperError::shape(
                owner,
                field,
                "specify the type of values contained in the list",
            ))
        }
        [inner] => inner,
        _ => return Err(MapperError::shape(owner, field, "list can contain only one type")),
    };
    let inner = match inner {
        DeclaredType::List(_) => {
            return Err(MapperError::shape(owner, field, "list can not contain another list"))
        }
        DeclaredType::Union(members) => TypeShape::Union(validate_union(owner, field, members)?),
        leaf => TypeShape::Leaf(validate_leaf(owner, field, leaf)?),
    };
    Ok(TypeShape::List(Box::new(inner)))
}
