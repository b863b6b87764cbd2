// tests/machine_core.rs

mod common;
use crate::common::{acknowledgements, detached, machine_with, notifications};

use std::time::Duration;

use serde_json::json;
use streamsheets::errors::StreamsheetError;
use streamsheets::machine::{MachineEffect, MachineNotification, MachineState};
use streamsheets::message::Message;
use streamsheets::queue::QueueKeys;
use streamsheets::sheet::SheetState;
use streamsheets::trigger::{Repeat, TriggerConfig, TriggerType};
use streamsheets_test_utils::builders::sheet_unit;
use streamsheets_test_utils::fake_processor::{ScriptedProcessor, seen_messages};

fn trigger(kind: TriggerType) -> TriggerConfig {
    TriggerConfig::new(kind, Repeat::Once)
}

#[test]
fn arrival_once_steps_exactly_once_per_put_while_running() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        processor.boxed(),
    )]);

    assert_eq!(core.start(0), MachineState::Running);
    core.take_effects();

    core.put_message("s1", Message::with_id("m1", json!({}))).unwrap();
    assert_eq!(core.pending_drains(), 1);

    assert!(core.run_drain(1));
    let effects = core.take_effects();
    assert_eq!(detached(&effects, "s1"), vec!["m1".to_string()]);
    assert!(!core.has_pending_drains(), "nothing left to drain");

    let sheet = core.sheet("s1").unwrap();
    assert!(!sheet.trigger().is_active(), "trigger deactivates until the next arrival");
    assert!(sheet.inbox().is_empty());

    core.cycle(2);
    core.cycle(3);
    assert_eq!(seen_messages(&log), vec![Some("m1".to_string())]);
}

#[test]
fn two_puts_before_the_drain_schedule_it_once() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        processor.boxed(),
    )]);
    core.start(0);

    core.put_message("s1", Message::with_id("m1", json!(1))).unwrap();
    core.put_message("s1", Message::with_id("m2", json!(2))).unwrap();
    assert_eq!(core.pending_drains(), 1);

    assert!(core.run_drain(1));
    assert_eq!(core.pending_drains(), 1, "drain re-arms while messages are pending");
    assert!(core.run_drain(2));
    assert!(!core.run_drain(3));

    assert_eq!(
        seen_messages(&log),
        vec![Some("m1".to_string()), Some("m2".to_string())]
    );
}

#[test]
fn puts_while_stopped_wait_for_the_first_cycle() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        processor.boxed(),
    )]);

    core.put_message("s1", Message::with_id("m1", json!(1))).unwrap();
    assert!(!core.has_pending_drains());

    core.start(0);
    core.cycle(1);
    assert_eq!(seen_messages(&log), vec![Some("m1".to_string())]);
}

#[test]
fn start_pause_stop_transitions_are_guarded() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Continuously),
        None,
        ScriptedProcessor::new().boxed(),
    )]);

    assert_eq!(core.pause(), MachineState::Stopped, "pause from stopped is a no-op");
    assert_eq!(core.start(0), MachineState::Running);
    let effects = core.take_effects();
    assert!(effects.contains(&MachineEffect::ScheduleCycle { delay: Duration::ZERO }));
    assert!(notifications(&effects).contains(&MachineNotification::StateChanged {
        from: MachineState::Stopped,
        to: MachineState::Running,
    }));

    assert_eq!(core.start(1), MachineState::Running);
    assert!(core.take_effects().is_empty(), "second start does nothing");

    assert_eq!(core.pause(), MachineState::Paused);
    assert!(core.take_effects().contains(&MachineEffect::CancelCycle));
    assert_eq!(core.pause(), MachineState::Paused);

    assert_eq!(core.stop(), MachineState::Stopped);
    assert_eq!(core.stop(), MachineState::Stopped);
}

#[test]
fn stop_trigger_holds_machine_in_will_stop_until_it_ran() {
    let stop_processor = ScriptedProcessor::new();
    let stop_log = stop_processor.log();
    let busy_processor = ScriptedProcessor::new();
    let busy_log = busy_processor.log();
    let mut core = machine_with(vec![
        sheet_unit("busy", trigger(TriggerType::Continuously), None, busy_processor.boxed()),
        sheet_unit("cleanup", trigger(TriggerType::Stop), None, stop_processor.boxed()),
    ]);

    core.start(0);
    core.cycle(1);
    assert_eq!(busy_log.lock().unwrap().len(), 1);
    assert!(stop_log.lock().unwrap().is_empty());

    assert_eq!(core.stop(), MachineState::WillStop);
    assert!(core.take_effects().contains(&MachineEffect::ScheduleCycle { delay: Duration::ZERO }));

    core.cycle(2);
    assert_eq!(stop_log.lock().unwrap().len(), 1);
    assert_eq!(busy_log.lock().unwrap().len(), 1, "only stop-bound sheets step in willStop");
    assert_eq!(core.state(), MachineState::Stopped);
}

#[test]
fn second_stop_forces_an_endless_stop_run_down() {
    let mut core = machine_with(vec![sheet_unit(
        "cleanup",
        TriggerConfig::new(TriggerType::Stop, Repeat::Endless),
        None,
        ScriptedProcessor::new().boxed(),
    )]);
    core.start(0);

    assert_eq!(core.stop(), MachineState::WillStop);
    core.cycle(1);
    core.cycle(2);
    assert_eq!(core.state(), MachineState::WillStop, "endless stop run keeps going");

    assert_eq!(core.stop(), MachineState::Stopped);
    assert!(!core.sheet("cleanup").unwrap().trigger().is_active());
}

#[test]
fn stop_sheet_lets_an_endless_stop_run_settle() {
    let mut core = machine_with(vec![sheet_unit(
        "cleanup",
        TriggerConfig::new(TriggerType::Stop, Repeat::Endless),
        None,
        ScriptedProcessor::new().boxed(),
    )]);
    core.start(0);
    core.stop();
    core.cycle(1);

    assert!(core.stop_sheet("cleanup").unwrap());
    core.cycle(2);
    assert_eq!(core.state(), MachineState::Stopped);
}

#[test]
fn failing_processor_stops_the_machine_and_reports_an_error() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Continuously),
        None,
        ScriptedProcessor::new()
            .then(streamsheets::sheet::ProcessOutcome::Done)
            .then_fail("division by zero")
            .boxed(),
    )]);
    core.start(0);
    core.cycle(1);
    assert_eq!(core.state(), MachineState::Running);
    core.take_effects();

    core.cycle(2);
    assert_eq!(core.state(), MachineState::Stopped);
    let effects = core.take_effects();
    assert!(effects.contains(&MachineEffect::CancelCycle));
    assert!(notifications(&effects).contains(&MachineNotification::Error {
        sheet: Some("s1".to_string()),
        message: "division by zero".to_string(),
    }));
}

#[test]
fn manual_step_runs_one_cycle_only_while_stopped_or_paused() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let timer = TriggerConfig::new(TriggerType::Timer, Repeat::Once)
        .with_interval(1, streamsheets::trigger::IntervalUnit::H);
    let mut core = machine_with(vec![sheet_unit("s1", timer, None, processor.boxed())]);

    assert!(core.manual_step(10));
    assert_eq!(log.lock().unwrap().len(), 1, "manual step opens the timer gate");
    assert_eq!(core.cycles(), 1);

    core.start(20);
    assert!(!core.manual_step(30), "manual step is refused while running");

    core.pause();
    assert!(core.manual_step(40));
    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(core.state(), MachineState::Paused);
}

#[test]
fn manual_step_respects_paused_sheets() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Continuously),
        None,
        processor.boxed(),
    )]);

    assert!(core.pause_sheet("s1").unwrap());
    assert!(!core.pause_sheet("s1").unwrap(), "pause is idempotent");
    core.manual_step(1);
    assert!(log.lock().unwrap().is_empty());

    assert!(core.resume_sheet("s1").unwrap());
    core.manual_step(2);
    assert_eq!(log.lock().unwrap()[0].state, SheetState::Resumed);
}

#[test]
fn execute_runs_once_per_cycle() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Execute),
        None,
        processor.boxed(),
    )]);
    core.start(0);

    assert!(core.execute("s1", Some(Message::with_id("x1", json!(1))), 1).unwrap());
    assert!(!core.execute("s1", None, 2).unwrap());

    core.cycle(3);
    assert!(core.execute("s1", Some(Message::with_id("x2", json!(2))), 4).unwrap());
    assert_eq!(
        seen_messages(&log),
        vec![Some("x1".to_string()), Some("x2".to_string())]
    );
}

#[test]
fn execute_on_a_stopped_machine_fires_every_time() {
    let processor = ScriptedProcessor::new();
    let log = processor.log();
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Execute),
        None,
        processor.boxed(),
    )]);
    assert_eq!(core.state(), MachineState::Stopped);

    assert!(core.execute("s1", Some(Message::with_id("x1", json!(1))), 1).unwrap());
    assert!(core.execute("s1", Some(Message::with_id("x2", json!(2))), 2).unwrap());
    assert!(core.execute("s1", None, 3).unwrap());
    assert_eq!(log.lock().unwrap().len(), 3);
    assert_eq!(
        seen_messages(&log)[..2],
        [Some("x1".to_string()), Some("x2".to_string())]
    );

    // Stopping after an execute while running clears the guard as well.
    core.start(4);
    assert!(core.execute("s1", None, 5).unwrap());
    core.stop();
    assert!(core.execute("s1", None, 6).unwrap());
}

#[test]
fn execute_failures_are_returned_without_stopping_the_machine() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Execute),
        None,
        ScriptedProcessor::new().then_fail("bad input").boxed(),
    )]);
    core.start(0);

    match core.execute("s1", None, 1) {
        Err(StreamsheetError::Processing { sheet, reason }) => {
            assert_eq!(sheet, "s1");
            assert_eq!(reason, "bad input");
        }
        other => panic!("expected processing error, got {other:?}"),
    }
    assert_eq!(core.state(), MachineState::Running);
}

#[test]
fn unknown_sheets_are_rejected() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        ScriptedProcessor::new().boxed(),
    )]);

    assert!(matches!(
        core.put_message("nope", Message::new(json!(1))),
        Err(StreamsheetError::UnknownSheet(id)) if id == "nope"
    ));
    assert!(core.execute("nope", None, 0).is_err());
    assert!(core.pause_sheet("nope").is_err());

    let dup = sheet_unit("s1", trigger(TriggerType::None), None, ScriptedProcessor::new().boxed());
    assert!(matches!(core.add_sheet(dup), Err(StreamsheetError::ConfigError(_))));
}

#[test]
fn queue_bound_puts_go_through_the_queue() {
    let keys = QueueKeys::for_sheet("m1", "s1", "sensors");
    let sheet = sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        ScriptedProcessor::new().boxed(),
    )
    .with_queue(keys.clone());
    let mut core = machine_with(vec![sheet]);
    core.start(0);
    core.take_effects();

    core.put_message("s1", Message::with_id("m1", json!(1))).unwrap();
    let effects = core.take_effects();
    assert!(matches!(
        effects.as_slice(),
        [MachineEffect::Enqueue { sheet, queue, message }]
            if sheet == "s1" && *queue == keys.queue && message.id == "m1"
    ));
    assert!(core.sheet("s1").unwrap().inbox().is_empty());
}

#[test]
fn delivered_payloads_are_acknowledged_once_processed() {
    let keys = QueueKeys::for_sheet("m1", "s1", "sensors");
    let sheet = sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        ScriptedProcessor::new().boxed(),
    )
    .with_queue(keys);
    let mut core = machine_with(vec![sheet]);
    core.start(0);
    core.take_effects();

    core.deliver("s1", r#"{"id": "q1", "data": 1}"#).unwrap();
    assert_eq!(acknowledgements(&core.take_effects()), 0);

    core.run_drain(1);
    assert_eq!(acknowledgements(&core.take_effects()), 1);

    core.deliver("s1", "{ not json").unwrap();
    assert_eq!(
        acknowledgements(&core.take_effects()),
        1,
        "malformed payloads give their credit back"
    );
    assert!(core.sheet("s1").unwrap().inbox().is_empty());
}

#[test]
fn delivered_payloads_sharing_an_id_each_return_their_credit() {
    let keys = QueueKeys::for_sheet("m1", "s1", "sensors");
    let sheet = sheet_unit(
        "s1",
        trigger(TriggerType::Arrival),
        None,
        ScriptedProcessor::new().boxed(),
    )
    .with_queue(keys);
    let mut core = machine_with(vec![sheet]);
    core.start(0);
    core.take_effects();

    core.deliver("s1", r#"{"id": "dup", "data": 1}"#).unwrap();
    core.deliver("s1", r#"{"id": "dup", "data": 2}"#).unwrap();

    let mut acks = 0;
    for now in 1..10 {
        core.run_drain(now);
        acks += acknowledgements(&core.take_effects());
    }
    assert_eq!(acks, 2);
    assert!(core.sheet("s1").unwrap().inbox().is_empty());
}

#[test]
fn clearing_an_inbox_acknowledges_delivered_messages() {
    let keys = QueueKeys::for_sheet("m1", "s1", "sensors");
    let sheet = sheet_unit(
        "s1",
        trigger(TriggerType::None),
        None,
        ScriptedProcessor::new().boxed(),
    )
    .with_queue(keys);
    let mut core = machine_with(vec![sheet]);

    core.deliver("s1", r#"{"id": "q1"}"#).unwrap();
    core.deliver("s1", r#"{"id": "q2"}"#).unwrap();
    core.clear_inbox("s1").unwrap();

    assert_eq!(acknowledgements(&core.take_effects()), 2);
}

#[test]
fn cycletime_changes_reschedule_while_running() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::None),
        None,
        ScriptedProcessor::new().boxed(),
    )]);

    assert!(matches!(
        core.set_cycletime(0),
        Err(StreamsheetError::InvalidRequest { .. })
    ));

    core.set_cycletime(200).unwrap();
    assert!(core.take_effects().is_empty(), "stopped machines only record the value");

    core.start(0);
    core.take_effects();
    core.set_cycletime(20).unwrap();
    assert_eq!(
        core.take_effects(),
        vec![MachineEffect::ScheduleCycle { delay: Duration::from_millis(20) }]
    );
    assert_eq!(core.snapshot().cycletime, 20);
}

#[test]
fn outbox_results_are_published_as_notifications() {
    let mut core = machine_with(vec![streamsheets::config::build_sheet(
        "m1",
        &streamsheets_test_utils::builders::SheetConfigBuilder::new("s1")
            .trigger(trigger(TriggerType::Arrival))
            .build(),
    )
    .unwrap()]);
    core.start(0);
    core.put_message("s1", Message::with_id("m1", json!({ "v": 1 }))).unwrap();
    core.run_drain(1);

    let effects = core.take_effects();
    let published: Vec<_> = notifications(&effects)
        .into_iter()
        .filter_map(|n| match n {
            MachineNotification::OutboxPut { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].data, json!({ "v": 1 }));
    assert_eq!(core.outbox().len(), 1);
    assert_eq!(core.clear_outbox(), 1);
}

#[test]
fn snapshot_reports_sheet_state() {
    let mut core = machine_with(vec![sheet_unit(
        "s1",
        trigger(TriggerType::Continuously),
        Some("data"),
        ScriptedProcessor::new().boxed(),
    )]);
    core.put_message("s1", Message::with_id("m1", json!([1, 2, 3]))).unwrap();
    core.manual_step(1);

    let snap = core.snapshot();
    assert_eq!(snap.state, MachineState::Stopped);
    assert_eq!(snap.cycles, 1);
    let sheet = &snap.sheets[0];
    assert_eq!(sheet.current_message.as_deref(), Some("m1"));
    assert_eq!(sheet.loop_index, Some(1));
    assert_eq!(sheet.stats.steps, 1);
    assert_eq!(sheet.inbox_size, 1);

    let value = serde_json::to_value(&snap).unwrap();
    assert_eq!(value["state"], json!("stopped"));
    assert_eq!(value["sheets"][0]["trigger"], json!("continuously"));
}
