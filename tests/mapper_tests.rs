//! End-to-end tests for construction, merging and serialization
//!
//! Kinds come either from the schema documents under tests/fixtures or are
//! declared in code.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use property_mapper::adapter::{Int, Str};
use property_mapper::{
    DeclaredType, FieldValue, Interface, KindDef, KindRegistry, MapperError, MapperGraph,
    MapperKind, RawOptions,
};
use serde_json::{json, Value};

fn fixtures_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn record(name: &str) -> Value {
    let text = std::fs::read_to_string(fixtures_path().join("records").join(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn library_registry() -> KindRegistry {
    let mut registry = KindRegistry::new();
    registry
        .load_paths(&[fixtures_path().join("schemas/library.json")])
        .unwrap();
    registry
}

fn pair_kind() -> Arc<MapperKind> {
    KindDef::new("Pair")
        .implements(
            Interface::new("IPair")
                .field("string", DeclaredType::adapter(Str))
                .field("integer", DeclaredType::adapter(Int)),
        )
        .compile()
        .unwrap()
}

fn book_ids(graph: &MapperGraph, shelf: property_mapper::NodeId) -> Vec<(String, property_mapper::NodeId)> {
    graph
        .get(shelf, "books")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|item| {
            let id = item.as_node().unwrap();
            let isbn = graph.to_raw(id).unwrap()["isbn"].as_str().unwrap().to_string();
            (isbn, id)
        })
        .collect()
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_fixture_round_trip() {
    let registry = library_registry();
    let raw = record("library.json");
    let (graph, root) = MapperGraph::from_raw(registry.get("Library").unwrap(), &raw).unwrap();

    assert_eq!(graph.to_raw(root).unwrap(), raw);
    assert!(!graph.is_changed(root).unwrap());
    // library, two shelves, three books
    assert_eq!(graph.len(), 6);
}

#[test]
fn test_paths_and_parents() {
    let registry = library_registry();
    let (graph, root) =
        MapperGraph::from_raw(registry.get("Library").unwrap(), &record("library.json")).unwrap();

    let fiction = graph.get(root, "shelves").unwrap().as_list().unwrap()[0]
        .as_node()
        .unwrap();
    let dune = book_ids(&graph, fiction)[0].1;
    let messiah = graph.child(dune, "sequel").unwrap().unwrap();

    assert_eq!(graph.path(messiah).unwrap(), "Library.shelves.books.sequel");
    assert_eq!(graph.parent(messiah).unwrap(), dune);
    assert_eq!(graph.root_of(messiah).unwrap(), root);
    assert_eq!(graph.parent(root).unwrap(), root);
    assert_eq!(graph.field_name(messiah).unwrap().as_deref(), Some("sequel"));
}

#[test]
fn test_self_reference_nests() {
    let registry = library_registry();
    let book = registry.get("Book").unwrap();
    let sequel = book.shape("sequel").unwrap().alternatives()[0].clone();
    match sequel {
        property_mapper::shape::Leaf::Kind(kind_ref) => {
            assert!(Arc::ptr_eq(&kind_ref.get().unwrap(), book));
        }
        other => panic!("Expected a kind leaf, got {:?}", other),
    }

    let raw = json!({
        "isbn": "1", "title": "a", "pages": 1,
        "sequel": {"isbn": "2", "title": "b", "pages": 2,
            "sequel": {"isbn": "3", "title": "c", "pages": 3}}
    });
    let (graph, root) = MapperGraph::from_raw(book, &raw).unwrap();
    let second = graph.child(root, "sequel").unwrap().unwrap();
    let third = graph.child(second, "sequel").unwrap().unwrap();
    assert_eq!(graph.path(third).unwrap(), "Book.sequel.sequel");
    assert_eq!(graph.to_raw(root).unwrap(), raw);
}

#[test]
fn test_alternation_follows_declaration_order() {
    let kind = KindDef::new("Code")
        .implements(Interface::new("ICode").field(
            "value",
            DeclaredType::union([DeclaredType::adapter(Int), DeclaredType::adapter(Str)]),
        ))
        .compile()
        .unwrap();

    let (graph, root) = MapperGraph::from_raw(&kind, &json!({"value": "5"})).unwrap();
    let value = graph.get(root, "value").unwrap();
    assert_eq!(value.as_scalar().unwrap().adapter().name(), "str");

    let (graph, root) = MapperGraph::from_raw(&kind, &json!({"value": 5})).unwrap();
    let value = graph.get(root, "value").unwrap();
    assert_eq!(value.as_scalar().unwrap().adapter().name(), "int");
    assert_eq!(graph.to_raw(root).unwrap(), json!({"value": 5}));
}

#[test]
fn test_mixed_list_takes_first_accepting_alternative() {
    let kind = KindDef::new("Labels")
        .implements(Interface::new("ILabels").field(
            "items",
            DeclaredType::list(DeclaredType::union([
                DeclaredType::adapter(Str),
                DeclaredType::adapter(Int),
            ])),
        ))
        .compile()
        .unwrap();

    let (graph, root) = MapperGraph::from_raw(&kind, &json!({"items": [1, "2", 3]})).unwrap();
    assert_eq!(graph.to_raw(root).unwrap(), json!({"items": ["1", "2", "3"]}));
}

#[test]
fn test_unknown_keys_are_contained() {
    let registry = library_registry();
    let book = registry.get("Book").unwrap();
    let raw = json!({"isbn": "9", "title": "t", "pages": 1, "condition": "worn"});
    let (graph, root) = MapperGraph::from_raw(book, &raw).unwrap();

    assert_eq!(graph.unknown(root).unwrap().get("condition"), Some(&json!("worn")));
    assert!(graph.to_raw(root).unwrap().get("condition").is_none());
    assert_eq!(graph.to_raw_with(root, &RawOptions::with_unknown()).unwrap(), raw);

    let err = MapperGraph::from_raw(
        registry.get("Shelf").unwrap(),
        &json!({"label": "x", "books": [], "colour": "red"}),
    )
    .unwrap_err();
    match err {
        MapperError::Validation { path, reason, .. } => {
            assert_eq!(path, "Shelf");
            assert!(reason.contains("colour"));
        }
        other => panic!("Expected Validation, got {:?}", other),
    }
}

#[test]
fn test_nested_failure_reports_path() {
    let registry = library_registry();
    let err = MapperGraph::from_raw(
        registry.get("Shelf").unwrap(),
        &json!({"label": "x", "books": [{"isbn": "1", "title": "t", "pages": "many"}]}),
    )
    .unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("Shelf.books"));
}

// =============================================================================
// Merging
// =============================================================================

#[test]
fn test_merge_replaces_scalars_in_place() {
    let kind = pair_kind();
    let (mut graph, root) =
        MapperGraph::from_raw(&kind, &json!({"string": "blah", "integer": 100})).unwrap();

    let second = json!({"string": "another", "integer": 4});
    let merged = graph.merge(root, &second).unwrap();

    assert_eq!(merged, root);
    assert_eq!(graph.len(), 1);
    assert!(graph.is_changed(root).unwrap());
    assert_eq!(graph.to_raw(root).unwrap(), second);
}

#[test]
fn test_merge_is_idempotent() {
    let registry = library_registry();
    let raw = record("library.json");
    let (mut graph, root) = MapperGraph::from_raw(registry.get("Library").unwrap(), &raw).unwrap();

    graph.merge(root, &raw).unwrap();
    assert!(!graph.is_changed(root).unwrap());
    assert_eq!(graph.to_raw(root).unwrap(), raw);

    let update = record("library_update.json");
    graph.merge(root, &update).unwrap();
    assert!(graph.is_changed(root).unwrap());
    let after = graph.to_raw(root).unwrap();

    graph.merge(root, &update).unwrap();
    assert!(!graph.is_changed(root).unwrap());
    assert_eq!(graph.to_raw(root).unwrap(), after);
}

#[test]
fn test_merge_preserves_nested_identity() {
    let registry = library_registry();
    let (mut graph, root) =
        MapperGraph::from_raw(registry.get("Library").unwrap(), &record("library.json")).unwrap();

    let shelves = graph.get(root, "shelves").unwrap();
    let fiction = shelves.as_list().unwrap()[0].as_node().unwrap();
    let poetry = shelves.as_list().unwrap()[1].as_node().unwrap();
    let before = book_ids(&graph, fiction);
    let dune = before[0].1;
    let messiah = graph.child(dune, "sequel").unwrap().unwrap();

    graph.merge(root, &record("library_update.json")).unwrap();

    // the fiction shelf is matched by label and kept, poetry is gone
    let shelves = graph.get(root, "shelves").unwrap();
    assert_eq!(shelves.as_list().unwrap().len(), 1);
    assert_eq!(shelves.as_list().unwrap()[0].as_node(), Some(fiction));
    assert!(!graph.contains(poetry));

    // books are matched by isbn; the new order follows the update
    let after = book_ids(&graph, fiction);
    let isbns: Vec<&str> = after.iter().map(|(isbn, _)| isbn.as_str()).collect();
    assert_eq!(isbns, vec!["222", "111", "333"]);
    assert_eq!(after[0].1, before[1].1);
    assert_eq!(after[1].1, dune);

    // fields absent from the update are left alone
    assert_eq!(graph.child(dune, "sequel").unwrap(), Some(messiah));
    assert_eq!(graph.unknown(dune).unwrap().get("shelf_note"), Some(&json!("signed copy")));
    assert!(graph.is_changed(dune).unwrap());
    assert!(!graph.is_changed(after[0].1).unwrap());
    assert!(graph.is_changed(fiction).unwrap());
}

#[test]
fn test_merge_incompatible_child_is_rebuilt() {
    let registry = library_registry();
    let book = registry.get("Book").unwrap();
    let (mut graph, root) = MapperGraph::from_raw(
        book,
        &json!({"isbn": "1", "title": "a", "pages": 1, "sequel": {"isbn": "2", "title": "b", "pages": 2}}),
    )
    .unwrap();
    let old_sequel = graph.child(root, "sequel").unwrap().unwrap();

    graph
        .merge(root, &json!({"sequel": {"isbn": "5", "title": "e", "pages": 5}}))
        .unwrap();
    let new_sequel = graph.child(root, "sequel").unwrap().unwrap();

    assert_ne!(old_sequel, new_sequel);
    assert!(!graph.contains(old_sequel));
    assert!(graph.is_changed(root).unwrap());
    assert_eq!(graph.to_raw(new_sequel).unwrap(), json!({"isbn": "5", "title": "e", "pages": 5}));
}

#[test]
fn test_merge_null_clears_field() {
    let kind = pair_kind();
    let (mut graph, root) =
        MapperGraph::from_raw(&kind, &json!({"string": "s", "integer": 1})).unwrap();

    graph.merge(root, &json!({"integer": null})).unwrap();
    assert!(graph.is_changed(root).unwrap());
    assert_eq!(graph.get(root, "integer").unwrap(), FieldValue::Null);
    assert_eq!(graph.to_raw(root).unwrap(), json!({"string": "s"}));

    graph.merge(root, &json!({"integer": null})).unwrap();
    assert!(!graph.is_changed(root).unwrap());
}

// =============================================================================
// Equality
// =============================================================================

#[test]
fn test_key_field_equality() {
    let registry = library_registry();
    let book = registry.get("Book").unwrap();
    let (left, a) =
        MapperGraph::from_raw(book, &json!({"isbn": "42", "title": "first", "pages": 1})).unwrap();
    let (right, b) =
        MapperGraph::from_raw(book, &json!({"isbn": "42", "title": "second", "pages": 9})).unwrap();
    let (other, c) =
        MapperGraph::from_raw(book, &json!({"isbn": "43", "title": "first", "pages": 1})).unwrap();

    assert!(left.equals(a, &right, b).unwrap());
    assert!(!left.equals(a, &other, c).unwrap());
    assert!(left.is_equal_or_compat(a, &json!({"isbn": "42"})).unwrap());
    assert!(!left.is_equal_or_compat(a, &json!({"isbn": "43"})).unwrap());
}

#[test]
fn test_equality_without_key_compares_fields() {
    let kind = pair_kind();
    let (left, a) = MapperGraph::from_raw(&kind, &json!({"string": "s", "integer": 1})).unwrap();
    let (right, b) = MapperGraph::from_raw(&kind, &json!({"string": "s", "integer": 1})).unwrap();
    let (other, c) = MapperGraph::from_raw(&kind, &json!({"string": "s", "integer": 2})).unwrap();

    assert!(left.equals(a, &right, b).unwrap());
    assert!(!left.equals(a, &other, c).unwrap());

    let registry = library_registry();
    let (books, d) = MapperGraph::from_raw(
        registry.get("Book").unwrap(),
        &json!({"isbn": "1", "title": "t", "pages": 1}),
    )
    .unwrap();
    assert!(matches!(
        left.equals(a, &books, d),
        Err(MapperError::KindMismatch { .. })
    ));
}

// =============================================================================
// Runtime extension
// =============================================================================

#[test]
fn test_extended_instance_keeps_merging() {
    let kind = pair_kind();
    let (mut graph, root) =
        MapperGraph::from_raw(&kind, &json!({"string": "s", "integer": 1})).unwrap();

    let extended = graph
        .add_property(root, "extra", DeclaredType::adapter(Int), json!(7))
        .unwrap();
    assert_eq!(graph.kind_of(extended).unwrap().name(), "Pair1");
    assert!(graph.kind_of(extended).unwrap().is_a(&kind));

    graph.merge(extended, &json!({"extra": 8})).unwrap();
    assert_eq!(
        graph.to_raw(extended).unwrap(),
        json!({"string": "s", "integer": 1, "extra": 8})
    );

    graph.remove_property(extended, "string").unwrap();
    assert_eq!(graph.to_raw(extended).unwrap(), json!({"integer": 1, "extra": 8}));
    assert!(kind.shape("extra").is_none());
}
