#![forbid(unsafe_code)]

use std::sync::Arc;

use spacekit_api::{Callback, Limit, RecordingTransport, Request};
use spacekit_core::{record, ModuloShards, PrimitiveType::*, ShardFunction, ShardSet, Value};
use spacekit_space::{SpacesConfig, WriteOpts};

const CONFIG: &str = r#"
spaces:
  orders:
    space_no: 4
    fields:
      - { name: customer, type: int }
      - { name: id, type: int64 }
      - { name: status, type: str }
      - { name: _tail, type: [str, int] }
    primary: [customer, id]
    indexes:
      - [status]
    shard_fields: [customer]
    shards: 8
  tags:
    space_no: 5
    fields:
      - { name: tag, type: string }
"#;

fn ignore() -> Callback { Box::new(|_| {}) }

fn load() -> SpacesConfig { serde_yaml::from_str(CONFIG).unwrap() }

#[test]
fn yaml_definitions_compile() {
    let cfg = load();
    assert_eq!(cfg.names().collect::<Vec<_>>(), vec!["orders", "tags"]);
    let t = Arc::new(RecordingTransport::new());
    let orders = cfg.get("orders").unwrap().build(t.clone()).unwrap();
    assert_eq!(orders.indexes().len(), 2);
    assert_eq!(orders.schema().tail_position(), 3);
    assert_eq!(orders.schema().tail_size(), 2);
    assert_eq!(orders.router().fields(), ["customer".to_string()]);
    assert_eq!(orders.router().shard_count(), 8);

    let tags = cfg.get("tags").unwrap().build(t).unwrap();
    assert_eq!(tags.router().shard_count(), 1);
    assert_eq!(tags.indexes().primary().fields(), ["tag".to_string()]);
    assert_eq!(tags.schema().codec("tag"), Some(&Str.into()));
}

#[test]
fn unknown_keys_are_rejected() {
    let bad = "spaces:\n  x:\n    space_no: 1\n    fields: [{ name: a, type: int }]\n    shard: 2\n";
    assert!(serde_yaml::from_str::<SpacesConfig>(bad).is_err());
}

#[test]
fn writes_and_key_lookups_route_to_the_same_shard() {
    let t = Arc::new(RecordingTransport::new());
    let orders = load().get("orders").unwrap().build(t.clone()).unwrap();
    let expected = ModuloShards::new(8).route(&[Value::Int(42)]);

    orders
        .insert(&record! { "customer" => 42, "id" => 1i64, "status" => "new", "_tail" => vec![vec![Value::from("a"), Value::Int(1)]] }, ignore(), WriteOpts::default())
        .unwrap();
    orders.get_by_primary_key(vec![Value::Int(42), Value::Int(1)], ignore()).unwrap();
    orders.select(record! { "customer" => 42 }, 0, Limit::Unbounded, ignore()).unwrap();

    let reqs = t.take_requests();
    match &reqs[0] {
        Request::Insert(r) => {
            assert_eq!(r.tuple.len(), 5);
            assert_eq!(r.tuple[3..], [Value::from("a"), Value::Int(1)]);
            assert_eq!(r.shard_numbers, expected);
        }
        other => panic!("expected insert, got {:?}", other),
    }
    for req in &reqs[1..] {
        match req {
            Request::Select(r) => assert_eq!(r.shard_numbers, expected),
            other => panic!("expected select, got {:?}", other),
        }
    }
}

#[test]
fn lookups_without_the_shard_key_fan_out() {
    let t = Arc::new(RecordingTransport::new());
    let orders = load().get("orders").unwrap().build(t.clone()).unwrap();
    orders.select(record! { "status" => "new" }, 0, Limit::Unbounded, ignore()).unwrap();
    match t.last() {
        Some(Request::Select(r)) => {
            assert_eq!(r.index_no, 1);
            assert_eq!(r.shard_numbers, ShardSet::all(8));
        }
        other => panic!("expected select, got {:?}", other),
    }
}

#[test]
fn batches_union_their_shards() {
    let t = Arc::new(RecordingTransport::new());
    let orders = load().get("orders").unwrap().build(t.clone()).unwrap();
    let f = ModuloShards::new(8);
    let customers = [1, 2, 3, 4, 5];
    let expected: ShardSet = customers.iter().flat_map(|&c| f.route(&[Value::Int(c)]).iter().collect::<Vec<_>>()).collect();

    orders.select(record! { "customer" => customers.to_vec() }, 0, Limit::Unbounded, ignore()).unwrap();
    match t.last() {
        Some(Request::Select(r)) => {
            assert_eq!(r.keys.len(), 5);
            assert_eq!(r.shard_numbers, expected);
        }
        other => panic!("expected select, got {:?}", other),
    }
}

#[test]
fn descriptors_serialize_for_inspection() {
    let t = Arc::new(RecordingTransport::new());
    let orders = load().get("orders").unwrap().build(t.clone()).unwrap();
    orders.delete(vec![Value::Int(7), Value::Int(9)], ignore(), WriteOpts::default()).unwrap();
    let json = serde_json::to_value(t.last().unwrap()).unwrap();
    assert_eq!(json["op"], "delete");
    assert_eq!(json["space_no"], 4);
    assert_eq!(json["key"], serde_json::json!([7, 9]));
    assert_eq!(json["index_types"]["codecs"], serde_json::json!(["int", "int64"]));
    assert_eq!(json["index_types"]["trailing"], "reject");
}
