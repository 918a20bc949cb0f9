//! Driver tables shared by the unit tests.

use crate::field::{record_standard_fields, Extent, FieldDescriptor, StorageSlot};
use crate::{
    ids, DriverEntry, DriverRegistry, FieldFlags, FieldType, FieldValue, Record, RecordDriver,
    RecordHandle, RecordList, Result, RuntimeError, TypeTriple,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const CLASS_SENSOR: i64 = 900;
pub(crate) const TYPE_PROBE: i64 = 9001;
pub(crate) const TYPE_SKEWED: i64 = 9002;

pub(crate) mod probe {
    pub const COUNT: usize = 13;
    pub const READINGS: usize = 14;
    pub const PEER: usize = 16;
    pub const LATE: usize = 22;
    pub const RATE: usize = 25;
    pub const OWNER: usize = 27;
    pub const THRESHOLD: usize = 28;
    pub const SAMPLE_COUNT: usize = 30;
}

#[derive(Default)]
pub(crate) struct ProbeDriver {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub finished: AtomicUsize,
    pub fail_open: AtomicBool,
}

impl RecordDriver for ProbeDriver {
    fn finish_record_initialization(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(RuntimeError::FunctionFailed("probe offline".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn threshold_changed(record: &Record, field: usize, last: Option<&FieldValue>) -> Result<bool> {
    let current: f64 = record.read_index(field)?;
    let Some(last) = last else {
        return Ok(true);
    };
    let previous: f64 = last.read()?;
    Ok((current - previous).abs() > 0.5)
}

fn probe_fields() -> Vec<FieldDescriptor> {
    use FieldFlags as F;
    use StorageSlot::Type as T;
    let mut fields = record_standard_fields();
    fields.extend([
        FieldDescriptor::new("count", FieldType::Long, T, 0).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("readings", FieldType::Double, T, 1)
            .extents(vec![Extent::FromField {
                field_index: probe::COUNT,
                array_index: 0,
            }])
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::VARIABLE_LENGTH),
        FieldDescriptor::new("tag", FieldType::String, T, 2)
            .fixed(&[16])
            .flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("peer", FieldType::Record, T, 3).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("port", FieldType::Interface, T, 4).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("source", FieldType::RecordField, T, 5).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("mask", FieldType::Hex, T, 6).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("enabled", FieldType::Bool, T, 7).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("kind", FieldType::RecordType, T, 8).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("late", FieldType::Double, T, 9)
            .extents(vec![Extent::FromField {
                field_index: 23,
                array_index: 0,
            }])
            .flags(F::VARIABLE_LENGTH),
        FieldDescriptor::new("late_count", FieldType::Long, T, 10).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("secret", FieldType::Long, T, 11).flags(F::NO_ACCESS),
        FieldDescriptor::new("rate", FieldType::Double, T, 12).flags(F::POLL),
        FieldDescriptor::new("history", FieldType::Long, T, 13)
            .extents(vec![Extent::Variable])
            .flags(F::VARIABLE_LENGTH),
        FieldDescriptor::new("owner", FieldType::Record, T, 14).flags(F::NO_PARENT_DEPENDENCY),
        FieldDescriptor::new("threshold", FieldType::Double, T, 15).value_changed(threshold_changed),
        FieldDescriptor::new("samples", FieldType::Double, T, 16)
            .extents(vec![Extent::FromField {
                field_index: probe::SAMPLE_COUNT,
                array_index: 0,
            }])
            .flags(F::VARIABLE_LENGTH),
        FieldDescriptor::new("sample_count", FieldType::ULong, T, 17),
    ]);
    fields
}

/// A table whose first description field is sized by a later one.
fn skewed_fields() -> Vec<FieldDescriptor> {
    let mut fields = record_standard_fields();
    fields.extend([
        FieldDescriptor::new("data", FieldType::Double, StorageSlot::Type, 0)
            .extents(vec![Extent::FromField {
                field_index: 14,
                array_index: 0,
            }])
            .flags(FieldFlags::IN_DESCRIPTION | FieldFlags::VARIABLE_LENGTH),
        FieldDescriptor::new("n", FieldType::Long, StorageSlot::Type, 1).flags(FieldFlags::IN_DESCRIPTION),
    ]);
    fields
}

pub(crate) fn probe_registry() -> (DriverRegistry, Arc<ProbeDriver>) {
    let driver = Arc::new(ProbeDriver::default());
    let mut registry = DriverRegistry::new();
    registry
        .register_class("sensor", ids::SUPERCLASS_DEVICE, CLASS_SENSOR)
        .unwrap();
    registry
        .register(vec![
            DriverEntry::new(
                "probe",
                TypeTriple::new(ids::SUPERCLASS_DEVICE, CLASS_SENSOR, TYPE_PROBE),
                driver.clone(),
                probe_fields(),
            ),
            DriverEntry::new(
                "skewed",
                TypeTriple::new(ids::SUPERCLASS_DEVICE, CLASS_SENSOR, TYPE_SKEWED),
                Arc::new(crate::PlainRecordDriver),
                skewed_fields(),
            ),
        ])
        .unwrap();
    (registry, driver)
}

pub(crate) fn probe_list() -> RecordList {
    RecordList::new(Arc::new(probe_registry().0))
}

/// A probe description with every reference NULL and `count` readings.
pub(crate) fn probe_line(name: &str, readings: &[f64]) -> String {
    let values: Vec<String> = readings.iter().map(|r| format!("{r:?}")).collect();
    format!(
        "{name} device sensor probe \"\" {} ( {} ) t NULL NULL NULL 0 0 probe 2",
        readings.len(),
        values.join(" ")
    )
}
