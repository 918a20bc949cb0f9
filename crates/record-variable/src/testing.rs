use crate::register_inline_variables;
use record_runtime::{DriverRegistry, RecordList};
use std::sync::Arc;

pub(crate) fn variable_list() -> RecordList {
    let mut registry = DriverRegistry::new();
    register_inline_variables(&mut registry).unwrap();
    RecordList::new(Arc::new(registry))
}
