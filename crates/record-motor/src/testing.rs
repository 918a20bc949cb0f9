use crate::register_motor_drivers;
use record_runtime::{CreationFlags, DriverRegistry, RecordHandle, RecordList};
use std::sync::Arc;

pub(crate) fn motor_list() -> RecordList {
    let mut registry = DriverRegistry::new();
    register_motor_drivers(&mut registry).unwrap();
    RecordList::new(Arc::new(registry))
}

/// Analog software motor with unit scale, zero offset and instant moves.
pub(crate) fn soft_line(name: &str, negative: &str, positive: &str) -> String {
    format!("{name} device motor soft_motor \"\" 0.0 0.0 {negative} {positive} 0.0 0.0 0.0 1.0 0.0 \"mm\" 0.0")
}

pub(crate) fn load(list: &mut RecordList, lines: &[String]) -> Vec<RecordHandle> {
    list.load_descriptions(lines.iter().map(String::as_str), CreationFlags::empty())
        .unwrap()
}
