//! record-runtime: typed record/field database with a driver registry,
//! dependency graph and text description codec

mod error;
pub use error::{ErrorKind, Result, RuntimeError};

mod clock;
pub use clock::ClockTick;

mod types;
pub use types::*;

mod value;
pub use value::{element_count, ArrayData, FieldScalar, FieldValue, Scalar};

pub mod field;
pub use field::{
    position, record_standard_fields, Dimensions, Extent, FieldDescriptor, FieldInstance,
    PollSchedule, StorageSlot, ValueChangedTest,
};

mod driver;
pub use driver::{validate, DriverEntry, DriverRegistry, PlainRecordDriver, RecordDriver, SlotSizes};

mod record;
pub use record::{DependencyEdge, Record, RecordState};

mod list;
pub use list::{default_value_changed, RecordList};

pub mod codec;
pub use codec::{tokenize, validate_record_name, Token};

mod config;
pub use config::{load_config_file, RuntimeConfig};

mod metrics;
pub use metrics::{MetricsHub, RuntimeMetrics};

#[cfg(test)]
pub(crate) mod testing;
