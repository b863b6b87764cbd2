// tests/runtime_machine.rs

mod common;
use crate::common::{init_tracing, machine_with, with_timeout};

use std::error::Error;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use streamsheets::config::build_machine;
use streamsheets::errors::StreamsheetError;
use streamsheets::machine::{MachineNotification, MachineRuntime, MachineState};
use streamsheets::message::Message;
use streamsheets::queue::{QueueKeys, QueueProducer, QueueStore, StoreHandle, spawn_store};
use streamsheets::trigger::{Repeat, TriggerConfig, TriggerType};
use streamsheets_test_utils::builders::{MachineConfigBuilder, SheetConfigBuilder, sheet_unit};
use streamsheets_test_utils::fake_processor::{ScriptedProcessor, seen_messages};

type TestResult = Result<(), Box<dyn Error>>;

async fn next_matching(
    rx: &mut broadcast::Receiver<MachineNotification>,
    pred: impl Fn(&MachineNotification) -> bool,
) -> MachineNotification {
    with_timeout(async {
        loop {
            match rx.recv().await {
                Ok(n) if pred(&n) => return n,
                Ok(_) => continue,
                Err(e) => panic!("notification stream failed: {e}"),
            }
        }
    })
    .await
}

async fn wait_for_members(store: &StoreHandle, source: &str) {
    with_timeout(async {
        while store.members(source).await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn arrival_sheet_processes_puts_out_of_cycle() -> TestResult {
    init_tracing();
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let core = machine_with(vec![sheet_unit(
        "s1",
        TriggerConfig::new(TriggerType::Arrival, Repeat::Once),
        None,
        processor.boxed(),
    )]);
    let (runtime, handle) = MachineRuntime::new(core, None);
    let join = runtime.spawn();
    let mut notifications = handle.subscribe();

    assert_eq!(handle.start().await?, MachineState::Running);
    handle.put("s1", Message::with_id("m1", json!({ "v": 1 }))).await?;

    let detached = next_matching(&mut notifications, |n| {
        matches!(n, MachineNotification::MessageDetached { .. })
    })
    .await;
    assert_eq!(
        detached,
        MachineNotification::MessageDetached {
            sheet: "s1".to_string(),
            message_id: "m1".to_string(),
        }
    );

    // Let a few cycles pass; nothing else may fire.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snap = handle.snapshot().await?;
    assert!(snap.cycles >= 5, "cycles keep running ({} so far)", snap.cycles);
    assert_eq!(snap.sheets[0].stats.steps, 1);
    assert_eq!(seen_messages(&log), vec![Some("m1".to_string())]);

    handle.shutdown().await?;
    join.await??;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cycles_follow_the_cycletime() -> TestResult {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let core = machine_with(vec![sheet_unit(
        "s1",
        TriggerConfig::new(TriggerType::Continuously, Repeat::Once),
        None,
        processor.boxed(),
    )]);
    let (runtime, handle) = MachineRuntime::new(core, None);
    let join = runtime.spawn();

    handle.set_cycletime(100).await?;
    handle.start().await?;
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    handle.pause().await?;
    let steps = log.lock().unwrap().len();
    // First cycle fires immediately, then one every 100 ms.
    assert!((10..=12).contains(&steps), "unexpected step count {steps}");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(log.lock().unwrap().len(), steps, "paused machine does not cycle");

    assert!(handle.step().await?);
    assert_eq!(log.lock().unwrap().len(), steps + 1);

    assert_eq!(handle.stop().await?, MachineState::Stopped);
    handle.shutdown().await?;
    join.await??;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cycle_failure_stops_the_machine_and_emits_an_error() -> TestResult {
    let core = machine_with(vec![sheet_unit(
        "s1",
        TriggerConfig::new(TriggerType::Continuously, Repeat::Once),
        None,
        ScriptedProcessor::new().then_fail("boom").boxed(),
    )]);
    let (runtime, handle) = MachineRuntime::new(core, None);
    let join = runtime.spawn();
    let mut notifications = handle.subscribe();

    handle.start().await?;
    let error = next_matching(&mut notifications, |n| {
        matches!(n, MachineNotification::Error { .. })
    })
    .await;
    assert_eq!(
        error,
        MachineNotification::Error {
            sheet: Some("s1".to_string()),
            message: "boom".to_string(),
        }
    );
    assert_eq!(handle.snapshot().await?.state, MachineState::Stopped);

    handle.shutdown().await?;
    join.await??;
    Ok(())
}

#[tokio::test]
async fn handle_calls_fail_once_the_runtime_is_gone() -> TestResult {
    let core = machine_with(vec![sheet_unit(
        "s1",
        TriggerConfig::new(TriggerType::None, Repeat::Once),
        None,
        ScriptedProcessor::new().boxed(),
    )]);
    let (runtime, handle) = MachineRuntime::new(core, None);
    let join = runtime.spawn();

    handle.shutdown().await?;
    join.await??;

    assert!(matches!(handle.start().await, Err(StreamsheetError::MachineGone)));
    Ok(())
}

#[tokio::test]
async fn queue_bound_sheet_receives_published_messages() -> TestResult {
    init_tracing();
    let cfg = MachineConfigBuilder::new()
        .id("m1")
        .cycletime(10)
        .with_sheet(
            SheetConfigBuilder::new("s1")
                .trigger(TriggerConfig::new(TriggerType::Arrival, Repeat::Once))
                .queue_source("sensors")
                .build(),
        )
        .build();
    let store = spawn_store(QueueStore::new(cfg.queue.max_buffer_size));
    let (runtime, handle) = MachineRuntime::new(build_machine(&cfg)?, Some(store.clone()));
    let join = runtime.spawn();
    let mut notifications = handle.subscribe();

    handle.start().await?;
    wait_for_members(&store, "sensors").await;

    let producer = QueueProducer::new(store.clone());
    producer
        .publish("sensors", &Message::with_id("p1", json!({ "t": 1 })))
        .await?;
    handle.put("s1", Message::with_id("p2", json!({ "t": 2 }))).await?;

    let mut results = Vec::new();
    while results.len() < 2 {
        if let MachineNotification::OutboxPut { message } = next_matching(&mut notifications, |n| {
            matches!(n, MachineNotification::OutboxPut { .. })
        })
        .await
        {
            results.push(message.data);
        }
    }
    assert_eq!(results, vec![json!({ "t": 1 }), json!({ "t": 2 })]);

    let queue = QueueKeys::for_sheet("m1", "s1", "sensors").queue;
    with_timeout(async {
        while store.stats(&queue).await.unwrap().pending > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    handle.shutdown().await?;
    join.await??;
    assert!(store.members("sensors").await?.is_empty(), "shutdown unsubscribes");
    Ok(())
}

#[tokio::test]
async fn malformed_queue_payload_does_not_block_later_messages() -> TestResult {
    let cfg = MachineConfigBuilder::new()
        .id("m1")
        .with_sheet(
            SheetConfigBuilder::new("s1")
                .trigger(TriggerConfig::new(TriggerType::Arrival, Repeat::Once))
                .queue_source("sensors")
                .build(),
        )
        .build();
    let store = spawn_store(QueueStore::default());
    let (runtime, handle) = MachineRuntime::new(build_machine(&cfg)?, Some(store.clone()));
    let join = runtime.spawn();
    let mut notifications = handle.subscribe();

    handle.start().await?;
    wait_for_members(&store, "sensors").await;

    let queue = QueueKeys::for_sheet("m1", "s1", "sensors").queue;
    store.enqueue(&queue, "{ broken".to_string()).await?;
    store
        .enqueue(&queue, r#"{"id": "ok", "data": 7}"#.to_string())
        .await?;

    let put = next_matching(&mut notifications, |n| {
        matches!(n, MachineNotification::OutboxPut { .. })
    })
    .await;
    match put {
        MachineNotification::OutboxPut { message } => assert_eq!(message.data, json!(7)),
        other => panic!("unexpected notification {other:?}"),
    }

    handle.shutdown().await?;
    join.await??;
    Ok(())
}
