// tests/message_iterator.rs

use serde_json::json;
use streamsheets::message::{Message, MessageIterator, MessagePath, PathRoot};

fn looped(path: &str, data: serde_json::Value) -> MessageIterator {
    let mut it = MessageIterator::new(Some(MessagePath::parse(path).unwrap()));
    it.attach(&Message::with_id("m1", data));
    it
}

#[test]
fn next_walks_array_in_order_and_parks_at_end() {
    let mut it = looped("data.items", json!({ "items": ["a", "b", "c"] }));

    assert_eq!(it.len(), 3);
    assert!(it.has_next());
    assert!(!it.has_previous());

    let seen: Vec<_> = (0..3).map(|_| it.next().unwrap().value).collect();
    assert_eq!(seen, vec![json!("a"), json!("b"), json!("c")]);

    assert!(it.next().is_none(), "fourth next must not overrun");
    assert!(it.next().is_none(), "next stays idempotent at the end");
    assert!(!it.has_next());

    let back = it.previous().expect("previous after the end");
    assert_eq!(back.value, json!("c"));
    assert_eq!(back.index, 2);
}

#[test]
fn previous_never_moves_below_first_element() {
    let mut it = looped("items", json!({ "items": [1, 2] }));

    assert!(it.previous().is_none());
    it.next();
    assert!(it.previous().is_none());
    assert_eq!(it.index(), Some(0));

    it.next();
    assert_eq!(it.previous().unwrap().value, json!(1));
}

#[test]
fn objects_enumerate_keys_in_insertion_order() {
    let mut it = looped("data", json!({ "z": 1, "a": 2, "m": 3 }));

    assert_eq!(it.keys(), &["z".to_string(), "a".to_string(), "m".to_string()]);
    it.next();
    assert_eq!(it.index_key(), Some("z"));
    let second = it.next().unwrap();
    assert_eq!(second.key, "a");
    assert_eq!(second.value, json!(2));
}

#[test]
fn disabled_iterator_keeps_its_position() {
    let mut it = looped("data.items", json!({ "items": [10, 20, 30] }));
    it.next();

    it.set_enabled(false);
    assert!(it.next().is_none());
    assert!(it.previous().is_none());
    assert!(!it.has_next());
    assert_eq!(it.index(), Some(0));

    it.set_enabled(true);
    assert_eq!(it.next().unwrap().value, json!(20));
}

#[test]
fn scalar_or_missing_path_yields_empty_collection() {
    let mut scalar = looped("data.count", json!({ "count": 3 }));
    assert!(scalar.is_empty());
    assert!(scalar.next().is_none());
    assert!(scalar.is_exhausted());

    let missing = looped("data.nope", json!({}));
    assert!(missing.is_empty());
}

#[test]
fn iterator_without_path_is_not_a_loop() {
    let it = MessageIterator::new(None);
    assert!(!it.is_loop());
    assert!(it.is_exhausted());
}

#[test]
fn paths_accept_dotted_and_bracketed_forms() {
    let msg = {
        let mut m = Message::with_id("m1", json!({ "rows": [{ "name": "x" }, { "name": "y" }] }));
        m.set_meta("tags", json!(["t0", "t1"]));
        m
    };

    let dotted = MessagePath::parse("data.rows[1].name").unwrap();
    assert_eq!(dotted.resolve(&msg), Some(&json!("y")));

    let bracketed = MessagePath::parse("[Data][rows][0][name]").unwrap();
    assert_eq!(bracketed.resolve(&msg), Some(&json!("x")));

    let meta = MessagePath::parse("metadata.tags[0]").unwrap();
    assert_eq!(meta.root(), PathRoot::Metadata);
    assert_eq!(meta.resolve(&msg), Some(&json!("t0")));

    let implicit = MessagePath::parse("rows").unwrap();
    assert_eq!(implicit.root(), PathRoot::Data);
    assert!(implicit.resolve(&msg).unwrap().is_array());
}

#[test]
fn malformed_paths_are_rejected() {
    assert!(MessagePath::parse("").is_err());
    assert!(MessagePath::parse("data[rows").is_err());
    assert!(MessagePath::parse("...").is_err());
}

#[test]
fn plain_json_becomes_message_data() {
    let msg = Message::from_json_str(r#"{"temperature": 21}"#).unwrap();
    assert_eq!(msg.data, json!({ "temperature": 21 }));
    assert!(!msg.id.is_empty());

    let full = Message::from_json_str(r#"{"id": "m7", "data": [1, 2]}"#).unwrap();
    assert_eq!(full.id, "m7");
    assert_eq!(full.data, json!([1, 2]));
    assert!(full.metadata.is_object());

    assert!(Message::from_json_str("not json").is_err());
}
