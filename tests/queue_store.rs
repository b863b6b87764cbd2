// tests/queue_store.rs

use streamsheets::queue::{CREDIT_LIMIT, EnqueueOutcome, QueueKeys, QueueStats, QueueStore};

fn keys(sheet: &str) -> QueueKeys {
    QueueKeys::for_sheet("m1", sheet, "sensors")
}

#[test]
fn keys_follow_the_store_naming_scheme() {
    let k = keys("s1");
    assert_eq!(k.queue, "streamsheets:inbox:m1:s1");
    assert_eq!(k.pending, "streamsheets:inbox:m1:s1.pending");
    assert_eq!(k.members, "streamsheets:consumers:sensors");
    assert_eq!(k.to_string(), k.queue);
}

#[test]
fn credit_limit_then_buffer_then_drop() {
    let mut store = QueueStore::new(3);
    let k = keys("s1");
    let mut rx = store.subscribe(&k);

    for i in 0..CREDIT_LIMIT {
        assert_eq!(store.enqueue(&k.queue, format!("{i}")), EnqueueOutcome::Delivered);
    }
    assert_eq!(store.enqueue(&k.queue, "b1".into()), EnqueueOutcome::Buffered(1));
    assert_eq!(store.enqueue(&k.queue, "b2".into()), EnqueueOutcome::Buffered(2));
    assert_eq!(store.enqueue(&k.queue, "b3".into()), EnqueueOutcome::Buffered(3));
    assert_eq!(store.enqueue(&k.queue, "lost".into()), EnqueueOutcome::Dropped);

    assert_eq!(
        store.stats(&k.queue),
        QueueStats {
            pending: CREDIT_LIMIT,
            buffered: 3
        }
    );

    let mut delivered = Vec::new();
    while let Ok(p) = rx.try_recv() {
        delivered.push(p);
    }
    assert_eq!(delivered.len(), CREDIT_LIMIT);
    assert_eq!(delivered.first().map(String::as_str), Some("0"));
}

#[test]
fn acknowledge_forwards_the_oldest_buffered_payload() {
    let mut store = QueueStore::new(10);
    let k = keys("s1");
    let mut rx = store.subscribe(&k);
    for i in 0..CREDIT_LIMIT + 2 {
        store.enqueue(&k.queue, format!("{i}"));
    }
    while rx.try_recv().is_ok() {}

    assert_eq!(store.acknowledge(&k.queue), 1);
    assert_eq!(store.pending(&k.queue), CREDIT_LIMIT, "credit moves on to the buffered payload");
    assert_eq!(rx.try_recv().ok().as_deref(), Some("20"));

    assert_eq!(store.acknowledge(&k.queue), 0);
    assert_eq!(rx.try_recv().ok().as_deref(), Some("21"));

    assert_eq!(store.acknowledge(&k.queue), 0);
    assert_eq!(store.pending(&k.queue), CREDIT_LIMIT - 1, "empty buffer returns the credit");
}

#[test]
fn acknowledge_on_an_unknown_queue_is_harmless() {
    let mut store = QueueStore::default();
    assert_eq!(store.acknowledge("nope"), 0);
    assert_eq!(store.stats("nope"), QueueStats::default());
}

#[test]
fn enqueue_without_consumer_buffers_until_subscribe() {
    let mut store = QueueStore::default();
    let k = keys("s1");
    for i in 0..CREDIT_LIMIT + 5 {
        assert!(matches!(
            store.enqueue(&k.queue, format!("{i}")),
            EnqueueOutcome::Buffered(_)
        ));
    }

    let mut rx = store.subscribe(&k);
    let mut got = 0;
    while rx.try_recv().is_ok() {
        got += 1;
    }
    assert_eq!(got, CREDIT_LIMIT, "subscribe hands over at most one credit window");
    assert_eq!(store.pending(&k.queue), CREDIT_LIMIT);
    assert_eq!(store.buffer_len(&k.queue), 5);
}

#[test]
fn resubscribe_resets_credit() {
    let mut store = QueueStore::default();
    let k = keys("s1");
    let _old = store.subscribe(&k);
    for i in 0..5 {
        store.enqueue(&k.queue, format!("{i}"));
    }
    assert_eq!(store.pending(&k.queue), 5);

    let _new = store.subscribe(&k);
    assert_eq!(store.pending(&k.queue), 0);
}

#[test]
fn vanished_consumer_makes_enqueue_buffer() {
    let mut store = QueueStore::default();
    let k = keys("s1");
    drop(store.subscribe(&k));

    assert_eq!(store.enqueue(&k.queue, "x".into()), EnqueueOutcome::Buffered(1));
    assert_eq!(store.pending(&k.queue), 0);
}

#[test]
fn membership_tracks_subscribers_per_source() {
    let mut store = QueueStore::default();
    let a = keys("a");
    let b = keys("b");
    let other = QueueKeys::for_sheet("m1", "c", "logs");

    let _ra = store.subscribe(&a);
    let _rb = store.subscribe(&b);
    let _rc = store.subscribe(&other);
    assert_eq!(store.members("sensors"), vec![a.queue.clone(), b.queue.clone()]);
    assert_eq!(store.members("logs"), vec![other.queue.clone()]);

    store.unsubscribe(&a);
    assert_eq!(store.members("sensors"), vec![b.queue.clone()]);
    store.unsubscribe(&b);
    assert!(store.members("sensors").is_empty());
    assert_eq!(store.pending(&b.queue), 0);
}
