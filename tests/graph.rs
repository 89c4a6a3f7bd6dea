use std::sync::{Arc, Mutex};

use facet::Facet;
use facet_graph::{
    Constructor, EnumDef, Graph, Instance, JsonIoError, ObjId, ObjectResolver, Param, ReadOptions,
    Resolver, ScalarKind, SyntaxErrorKind, TypeDef, TypeInfo, TypeRef, TypeRegistry, Value,
    WriteOptions, extract, meta, parse_str, read_graph, read_maps, write_graph,
};

fn people() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(
        TypeDef::new("Person")
            .field("name", TypeRef::Scalar(ScalarKind::String))
            .field("friend", TypeRef::option(TypeRef::named("Person"))),
    );
    registry
}

fn object(value: &Value) -> ObjId {
    value.as_object().expect("expected an object handle")
}

#[test]
fn forward_references_in_arrays_are_patched() {
    let resolved = read_maps(r#"[{"@ref": 2}, {"@id": 2, "name": "b"}]"#, &ReadOptions::default()).unwrap();
    let items = resolved.graph.get(object(&resolved.root)).items().unwrap();
    assert_eq!(items[0], items[1]);
    assert_eq!(
        resolved.graph.field(object(&items[0]), "name"),
        Some(&Value::from("b"))
    );
}

#[test]
fn cycles_survive_a_round_trip() {
    let registry = people();
    let json = r#"{"@id": 1, "@type": "Person", "name": "A",
        "friend": {"@type": "Person", "name": "B", "friend": {"@ref": 1}}}"#;
    let first = read_graph(json, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    let root = object(&first.root);
    let b = first.graph.follow(root, "friend").unwrap();
    assert_eq!(first.graph.follow(b, "friend"), Some(root));

    let written = write_graph(&first.graph, &first.root, &registry, &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@id":1,"@type":"Person","name":"A","friend":{"name":"B","friend":{"@ref":1}}}"#);

    let second = read_graph(&written, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    assert!(first.graph.isomorphic(&first.root, &second.graph, &second.root));
}

#[test]
fn dangling_references_are_fatal() {
    let err = read_maps(r#"{"a": {"@ref": 7}}"#, &ReadOptions::default()).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"forward reference @ref: 7, but no object defined (@id) with that value");
}

#[test]
fn unknown_fields_reach_the_handler_in_order() {
    let mut registry = TypeRegistry::new();
    registry.register(TypeDef::new("Point").field("x", TypeRef::Scalar(ScalarKind::I32)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = ReadOptions::default().missing_field_handler(
        move |_: &Graph, _: ObjId, field: &str, value: &Value| {
            sink.lock().unwrap().push(format!("{field}={value}"));
        },
    );
    let resolved = read_graph(
        r#"{"x": 1, "y": 2, "z": "q"}"#,
        &registry,
        &options,
        &TypeRef::named("Point"),
    )
    .unwrap();
    assert_eq!(resolved.graph.field(object(&resolved.root), "x"), Some(&Value::I32(1)));
    assert_eq!(*seen.lock().unwrap(), vec!["y=2".to_string(), "z=q".to_string()]);
}

#[test]
fn nulls_and_blanks_zero_primitive_fields() {
    let mut registry = TypeRegistry::new();
    registry.register(
        TypeDef::new("Row")
            .field("x", TypeRef::Scalar(ScalarKind::I32))
            .field("flag", TypeRef::Scalar(ScalarKind::Bool))
            .field("n", TypeRef::option(TypeRef::Scalar(ScalarKind::I32))),
    );
    let resolved = read_graph(
        r#"{"x": "", "flag": null, "n": null}"#,
        &registry,
        &ReadOptions::default(),
        &TypeRef::named("Row"),
    )
    .unwrap();
    let row = object(&resolved.root);
    assert_eq!(resolved.graph.field(row, "x"), Some(&Value::I32(0)));
    assert_eq!(resolved.graph.field(row, "flag"), Some(&Value::Bool(false)));
    assert_eq!(resolved.graph.field(row, "n"), Some(&Value::Null));
}

#[test]
fn nesting_past_the_limit_is_a_syntax_error() {
    let options = ReadOptions::default().max_depth(3);
    let err = read_maps(r#"{"a": {"b": {"c": {"d": {"e": 1}}}}}"#, &options).unwrap_err();
    assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::DepthExceeded(3)));
}

#[test]
fn resolving_twice_returns_the_same_instance() {
    let registry = people();
    let options = ReadOptions::default();
    let doc = parse_str(r#"{"@id": 1, "name": "A", "friend": {"@ref": 1}}"#, &options).unwrap();
    let mut resolver = ObjectResolver::new(doc, &registry, &options);
    let hint = TypeRef::named("Person");
    let first = resolver.resolve(&hint).unwrap();
    let count = resolver.graph().len();
    let second = resolver.resolve(&hint).unwrap();
    assert_eq!(first, second);
    assert_eq!(resolver.graph().len(), count);
}

#[test]
fn map_keys_may_be_forward_references() {
    let json = r#"{"holder": {"owner": {"@id": 1, "name": "k"}},
        "index": {"@keys": [{"@ref": 1}], "@items": [42]}}"#;
    let resolved = read_maps(json, &ReadOptions::default()).unwrap();
    let root = object(&resolved.root);
    let holder = resolved.graph.follow(root, "holder").unwrap();
    let owner = resolved.graph.follow(holder, "owner").unwrap();
    let index = resolved.graph.follow(root, "index").unwrap();
    let Instance::Map { entries, .. } = resolved.graph.get(index) else {
        panic!("expected a map");
    };
    assert_eq!(entries.get(&Value::Object(owner)), Some(&Value::I64(42)));
}

#[test]
fn sorted_sets_come_out_sorted() {
    let resolved = read_maps(
        r#"{"@type": "sorted_set", "@items": [3, 1, 2]}"#,
        &ReadOptions::default(),
    )
    .unwrap();
    let Instance::Set { items, sorted, .. } = resolved.graph.get(object(&resolved.root)) else {
        panic!("expected a set");
    };
    assert!(sorted);
    let items: Vec<_> = items.iter().cloned().collect();
    assert_eq!(items, vec![Value::I64(1), Value::I64(2), Value::I64(3)]);
}

#[test]
fn failing_constructors_can_fall_back_to_defaults() {
    let mut registry = TypeRegistry::new();
    registry.register(
        TypeDef::new("Temp")
            .field("c", TypeRef::Scalar(ScalarKind::I32))
            .without_default_constructor()
            .constructor(Constructor::public(
                vec![Param::new("c", TypeRef::Scalar(ScalarKind::I32))],
                |args| {
                    if args[0] == Value::I32(0) {
                        return Err("zero".to_string());
                    }
                    Ok(vec![("c".to_string(), args[0].clone())])
                },
            )),
    );
    let hint = TypeRef::named("Temp");

    let err = read_graph(r#"{"c": 0}"#, &registry, &ReadOptions::default(), &hint).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"unable to instantiate 'Temp': zero");

    let options = ReadOptions::default().allow_default_instantiation(true);
    let resolved = read_graph(r#"{"c": 0}"#, &registry, &options, &hint).unwrap();
    assert_eq!(resolved.graph.field(object(&resolved.root), "c"), Some(&Value::I32(0)));
}

#[test]
fn bytes_and_typed_lists_are_written_without_type_info() {
    let mut registry = TypeRegistry::new();
    registry.register(
        TypeDef::new("Blob")
            .field("data", TypeRef::Bytes)
            .field("tags", TypeRef::list(TypeRef::Scalar(ScalarKind::String))),
    );
    let resolved = read_graph(
        r#"{"data": "AQID", "tags": ["a"]}"#,
        &registry,
        &ReadOptions::default(),
        &TypeRef::named("Blob"),
    )
    .unwrap();
    let data = resolved.graph.follow(object(&resolved.root), "data").unwrap();
    assert_eq!(resolved.graph.get(data), &Instance::Bytes(vec![1, 2, 3]));

    let written = write_graph(&resolved.graph, &resolved.root, &registry, &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@type":"Blob","data":"AQID","tags":["a"]}"#);
}

#[test]
fn syntax_errors_render_with_position() {
    let err = read_maps(r#"{"a" 1}"#, &ReadOptions::default()).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"unexpected character '1', expected ':' at line 1, col 6");
    assert!(matches!(err, JsonIoError::Syntax { .. }));
}

#[test]
fn typed_maps_keep_key_order() {
    let registry = TypeRegistry::new();
    let resolved = read_graph(
        r#"{"@type": "map", "@keys": ["a", "b"], "@items": [1, 2]}"#,
        &registry,
        &ReadOptions::default(),
        &TypeRef::Any,
    )
    .unwrap();
    let Instance::Map { entries, .. } = resolved.graph.get(object(&resolved.root)) else {
        panic!("expected a map");
    };
    let entries: Vec<_> = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(
        entries,
        vec![(Value::from("a"), Value::I64(1)), (Value::from("b"), Value::I64(2))]
    );

    let written = write_graph(&resolved.graph, &resolved.root, &registry, &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@type":"map","a":1,"b":2}"#);
}

#[test]
fn map_keys_that_look_like_meta_keys_round_trip() {
    let options = ReadOptions::default();
    let first = read_maps(r#"{"@keys": ["@id", "b"], "@items": ["x", 2]}"#, &options).unwrap();
    let written = write_graph(&first.graph, &first.root, &TypeRegistry::new(), &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@type":"map","@keys":["@id","b"],"@items":["x",2]}"#);

    let second = read_maps(&written, &options).unwrap();
    assert!(first.graph.isomorphic(&first.root, &second.graph, &second.root));
    assert!(!meta::is_plain_key("@id"));
}

#[test]
fn reference_chains_are_followed() {
    let json = r#"[{"@id": 1, "@ref": 2}, {"@id": 2, "@ref": 3}, {"@id": 3, "v": 0}, {"@ref": 1}]"#;
    let resolved = read_maps(json, &ReadOptions::default()).unwrap();
    let items = resolved.graph.get(object(&resolved.root)).items().unwrap();
    assert!(items.iter().all(|item| *item == items[2]));
    assert_eq!(resolved.graph.field(object(&items[2]), "v"), Some(&Value::I64(0)));

    let options = ReadOptions::default().max_reference_chain_depth(1);
    let err = read_maps(json, &options).unwrap_err();
    assert!(matches!(
        err,
        JsonIoError::LimitExceeded { what: "reference chain depth", limit: 1 }
    ));
}

#[test]
fn too_many_ids_are_rejected() {
    let options = ReadOptions::default().max_object_references(1);
    let err = read_maps(r#"[{"@id": 1}, {"@id": 2}]"#, &options).unwrap_err();
    assert!(matches!(
        err,
        JsonIoError::LimitExceeded { what: "object references", limit: 1 }
    ));
}

#[test]
fn too_many_forward_references_are_rejected() {
    let json = r#"[{"@ref": 2}, {"@id": 2}]"#;
    assert!(read_maps(json, &ReadOptions::default().max_unresolved_references(1)).is_ok());
    let err = read_maps(json, &ReadOptions::default().max_unresolved_references(0)).unwrap_err();
    assert!(matches!(
        err,
        JsonIoError::LimitExceeded { what: "unresolved references", limit: 0 }
    ));
}

#[test]
fn too_many_missing_fields_are_rejected() {
    let mut registry = TypeRegistry::new();
    registry.register(TypeDef::new("Point").field("x", TypeRef::Scalar(ScalarKind::I32)));
    let options = ReadOptions::default().max_missing_fields(1);
    let hint = TypeRef::named("Point");
    assert!(read_graph(r#"{"x": 1, "y": 2}"#, &registry, &options, &hint).is_ok());
    let err = read_graph(r#"{"x": 1, "y": 2, "z": 3}"#, &registry, &options, &hint).unwrap_err();
    assert!(matches!(
        err,
        JsonIoError::LimitExceeded { what: "missing fields", limit: 1 }
    ));
}

#[test]
fn only_maps_count_towards_the_rehash_limit() {
    let options = ReadOptions::default().max_maps_to_rehash(1);
    let one_map = r#"{"s": {"@type": "sorted_set", "@items": [2, 1]}, "m": {"@keys": [1], "@items": [2]}}"#;
    assert!(read_maps(one_map, &options).is_ok());
    let two_maps = r#"{"a": {"@keys": [1], "@items": [2]}, "b": {"@keys": [3], "@items": [4]}}"#;
    let err = read_maps(two_maps, &options).unwrap_err();
    assert!(matches!(
        err,
        JsonIoError::LimitExceeded { what: "maps to rehash", limit: 1 }
    ));
}

#[test]
fn ids_above_the_maximum_are_rejected() {
    let options = ReadOptions::default().max_id_value(100);
    assert!(read_maps(r#"{"@id": 100}"#, &options).is_ok());
    let err = read_maps(r#"{"@id": 101}"#, &options).unwrap_err();
    assert!(matches!(
        err.syntax_kind(),
        Some(SyntaxErrorKind::InvalidMeta { key: "@id", .. })
    ));
    let err = read_maps(r#"{"a": {"@ref": -101}}"#, &options).unwrap_err();
    assert!(matches!(
        err.syntax_kind(),
        Some(SyntaxErrorKind::InvalidMeta { key: "@ref", .. })
    ));
}

#[test]
fn unknown_types_use_the_configured_fallback() {
    let registry = people();
    let json = r#"{"@type": "Robot", "name": "R2"}"#;

    let options = ReadOptions::default().unknown_type(TypeRef::named("Person"));
    let resolved = read_graph(json, &registry, &options, &TypeRef::Any).unwrap();
    let root = object(&resolved.root);
    assert_eq!(resolved.graph.get(root).type_ref(), TypeRef::named("Person"));
    assert_eq!(resolved.graph.field(root, "name"), Some(&Value::from("R2")));

    let options = ReadOptions::default().fail_on_unknown_type(true);
    let err = read_graph(json, &registry, &options, &TypeRef::Any).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"unknown type 'Robot'");
}

#[test]
fn mismatched_keys_and_items_are_rejected() {
    let err = read_maps(r#"{"@keys": ["a", "b"], "@items": [1]}"#, &ReadOptions::default()).unwrap_err();
    let Some(SyntaxErrorKind::InvalidMeta { key, reason }) = err.syntax_kind() else {
        panic!("expected an invalid meta key, got {err}");
    };
    assert_eq!(*key, "@keys");
    assert_eq!(reason, "2 keys but 1 items");
}

fn two_people() -> (TypeRegistry, Graph, Value) {
    let registry = people();
    let json = r#"{"@id": 1, "@type": "Person", "name": "A",
        "friend": {"@type": "Person", "name": "B", "friend": {"@ref": 1}}}"#;
    let resolved = read_graph(json, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    (registry, resolved.graph, resolved.root)
}

#[test]
fn type_info_can_be_forced_or_dropped() {
    let (registry, graph, root) = two_people();

    let always = WriteOptions::default().type_info(TypeInfo::Always);
    let written = write_graph(&graph, &root, &registry, &always).unwrap();
    insta::assert_snapshot!(written, @r#"{"@id":1,"@type":"Person","name":"A","friend":{"@type":"Person","name":"B","friend":{"@ref":1}}}"#);

    let never = WriteOptions::default().type_info(TypeInfo::Never);
    let written = write_graph(&graph, &root, &registry, &never).unwrap();
    insta::assert_snapshot!(written, @r#"{"@id":1,"name":"A","friend":{"name":"B","friend":{"@ref":1}}}"#);

    let back = read_graph(&written, &registry, &ReadOptions::default(), &TypeRef::named("Person")).unwrap();
    assert!(graph.isomorphic(&root, &back.graph, &back.root));
}

#[test]
fn short_meta_keys_read_back() {
    let (registry, graph, root) = two_people();
    let options = WriteOptions::default().short_meta_keys(true);
    let written = write_graph(&graph, &root, &registry, &options).unwrap();
    insta::assert_snapshot!(written, @r#"{"@i":1,"@t":"Person","name":"A","friend":{"name":"B","friend":{"@r":1}}}"#);

    let back = read_graph(&written, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    assert!(graph.isomorphic(&root, &back.graph, &back.root));
}

#[test]
fn atomic_type_names_read_as_plain_values() {
    let resolved = read_maps(
        r#"{"n": {"@type": "AtomicInteger", "value": 5}, "on": {"@type": "AtomicBoolean", "value": true}}"#,
        &ReadOptions::default(),
    )
    .unwrap();
    let root = object(&resolved.root);
    assert_eq!(resolved.graph.field(root, "n"), Some(&Value::I32(5)));
    assert_eq!(resolved.graph.field(root, "on"), Some(&Value::Bool(true)));
}

#[test]
fn uuids_round_trip() {
    let mut registry = TypeRegistry::new();
    registry.register(
        TypeDef::new("Ticket")
            .field("id", TypeRef::Scalar(ScalarKind::Uuid))
            .field("extra", TypeRef::Any),
    );
    let json = r#"{"id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
        "extra": {"@type": "uuid", "value": "67e55044-10b1-426f-9247-bb680e5fe0c8"}}"#;
    let first = read_graph(json, &registry, &ReadOptions::default(), &TypeRef::named("Ticket")).unwrap();
    let ticket = object(&first.root);
    let id = first.graph.field(ticket, "id").unwrap();
    assert!(matches!(id, Value::Uuid(_)));
    assert_eq!(first.graph.field(ticket, "extra"), Some(id));

    let written = write_graph(&first.graph, &first.root, &registry, &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@type":"Ticket","id":"67e55044-10b1-426f-9247-bb680e5fe0c8","extra":{"@type":"uuid","value":"67e55044-10b1-426f-9247-bb680e5fe0c8"}}"#);

    let second = read_graph(&written, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    assert!(first.graph.isomorphic(&first.root, &second.graph, &second.root));

    let err = read_graph(r#"{"id": "nope"}"#, &registry, &ReadOptions::default(), &TypeRef::named("Ticket"))
        .unwrap_err();
    assert!(matches!(err, JsonIoError::Conversion { .. }));
}

#[test]
fn enum_values_round_trip() {
    let mut registry = TypeRegistry::new();
    let color = registry.register_enum(EnumDef::new("Color", ["RED", "GREEN"]));
    registry.register(
        TypeDef::new("Pixel")
            .field("color", color)
            .field("extra", TypeRef::Any),
    );
    let json = r#"{"color": "GREEN", "extra": {"@type": "Color", "name": "RED"}}"#;
    let first = read_graph(json, &registry, &ReadOptions::default(), &TypeRef::named("Pixel")).unwrap();
    let pixel = object(&first.root);
    assert_eq!(
        first.graph.field(pixel, "color"),
        Some(&Value::Enum {
            ty: "Color".to_string(),
            variant: "GREEN".to_string()
        })
    );

    let written = write_graph(&first.graph, &first.root, &registry, &WriteOptions::default()).unwrap();
    insta::assert_snapshot!(written, @r#"{"@type":"Pixel","color":"GREEN","extra":{"@type":"Color","name":"RED"}}"#);

    let second = read_graph(&written, &registry, &ReadOptions::default(), &TypeRef::Any).unwrap();
    assert!(first.graph.isomorphic(&first.root, &second.graph, &second.root));

    let err = read_graph(r#"{"color": "BLUE"}"#, &registry, &ReadOptions::default(), &TypeRef::named("Pixel"))
        .unwrap_err();
    assert!(matches!(err, JsonIoError::Conversion { .. }));
}

#[derive(Facet, Debug, PartialEq)]
struct Address {
    city: String,
}

#[derive(Facet, Debug, PartialEq)]
struct Customer {
    name: String,
    age: u32,
    tags: Vec<String>,
    address: Option<Address>,
}

#[test]
fn facet_types_read_and_extract() {
    let mut registry = TypeRegistry::new();
    let hint = registry.register_facet::<Customer>();
    let resolved = read_graph(
        r#"{"name": "Ann", "age": "41", "tags": ["x"], "address": {"city": "Oslo"}}"#,
        &registry,
        &ReadOptions::default(),
        &hint,
    )
    .unwrap();
    let customer: Customer = extract(&resolved.graph, &resolved.root).unwrap();
    assert_eq!(
        customer,
        Customer {
            name: "Ann".to_string(),
            age: 41,
            tags: vec!["x".to_string()],
            address: Some(Address {
                city: "Oslo".to_string()
            }),
        }
    );
}
