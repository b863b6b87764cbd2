#![allow(dead_code, unused_imports)]

use std::time::Duration;

use streamsheets::machine::{MachineCore, MachineEffect, MachineNotification};
use streamsheets::sheet::SheetUnit;

pub use streamsheets_test_utils::{init_tracing, with_timeout};

/// Machine with a 50 ms cycle holding `sheets` in order.
pub fn machine_with(sheets: Vec<SheetUnit>) -> MachineCore {
    let mut core = MachineCore::new("m1", "test machine", Duration::from_millis(50));
    for sheet in sheets {
        core.add_sheet(sheet).expect("unique sheet ids");
    }
    core
}

pub fn notifications(effects: &[MachineEffect]) -> Vec<MachineNotification> {
    effects
        .iter()
        .filter_map(|e| match e {
            MachineEffect::Notify(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}

/// Ids of messages detached from `sheet`, in order.
pub fn detached(effects: &[MachineEffect], sheet: &str) -> Vec<String> {
    notifications(effects)
        .into_iter()
        .filter_map(|n| match n {
            MachineNotification::MessageDetached {
                sheet: s,
                message_id,
            } if s == sheet => Some(message_id),
            _ => None,
        })
        .collect()
}

pub fn acknowledgements(effects: &[MachineEffect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, MachineEffect::Acknowledge { .. }))
        .count()
}
