use crate::types::label;
use crate::MotorSubclass;
use record_runtime::{
    record_standard_fields, FieldDescriptor, FieldFlags, FieldType, Record, Result, RuntimeError,
    Scalar, StorageSlot, FieldValue, UNITS_NAME_LENGTH,
};

/// Field indexes of the motor class, shared by every motor driver.
pub mod mtr {
    pub const RAW_DESTINATION: usize = 13;
    pub const RAW_POSITION: usize = 14;
    pub const RAW_BACKLASH_CORRECTION: usize = 15;
    pub const RAW_NEGATIVE_LIMIT: usize = 16;
    pub const RAW_POSITIVE_LIMIT: usize = 17;
    pub const RAW_MOVE_DEADBAND: usize = 18;
    pub const RAW_SET_POSITION: usize = 19;
    pub const VALUE_CHANGE_THRESHOLD: usize = 20;
    pub const RAW_MINIMUM_SPEED_LIMIT: usize = 21;
    pub const RAW_MAXIMUM_SPEED_LIMIT: usize = 22;
    pub const SUBCLASS: usize = 23;
    pub const MOTOR_FLAGS: usize = 24;
    pub const SCALE: usize = 25;
    pub const OFFSET: usize = 26;
    pub const UNITS: usize = 27;
    pub const DESTINATION: usize = 28;
    pub const OLD_DESTINATION: usize = 29;
    pub const POSITION: usize = 30;
    pub const SET_POSITION: usize = 31;
    pub const BACKLASH_MOVE_IN_PROGRESS: usize = 32;
    pub const BACKLASH_CORRECTION: usize = 33;
    pub const NEGATIVE_LIMIT: usize = 34;
    pub const POSITIVE_LIMIT: usize = 35;
    pub const RAW_SPEED: usize = 36;
    pub const RAW_BASE_SPEED: usize = 37;
    pub const RAW_MAXIMUM_SPEED: usize = 38;
    pub const SPEED: usize = 39;
    pub const BASE_SPEED: usize = 40;
    pub const MAXIMUM_SPEED: usize = 41;
    pub const SAVED_SPEED: usize = 42;
    pub const SAVE_SPEED: usize = 43;
    pub const RESTORE_SPEED: usize = 44;
    pub const SYNCHRONOUS_MOTION_MODE: usize = 45;
    pub const ACCELERATION_TYPE: usize = 46;
    pub const RAW_ACCELERATION_PARAMETERS: usize = 47;
    pub const ACCELERATION_TIME: usize = 48;
    pub const ACCELERATION_DISTANCE: usize = 49;
    pub const BUSY: usize = 50;
    pub const BUSY_START_INTERVAL: usize = 51;
    pub const SOFT_ABORT: usize = 52;
    pub const STOP: usize = 53;
    pub const IMMEDIATE_ABORT: usize = 54;
    pub const NEGATIVE_LIMIT_HIT: usize = 55;
    pub const POSITIVE_LIMIT_HIT: usize = 56;
    pub const RAW_HOME_COMMAND: usize = 57;
    pub const HOME_SEARCH: usize = 58;
    pub const HOME_SEARCH_TYPE: usize = 59;
    pub const CONSTANT_VELOCITY_MOVE: usize = 60;
    pub const STATUS: usize = 61;
    pub const EXTENDED_STATUS: usize = 62;
    pub const AXIS_ENABLE: usize = 63;
    pub const CLOSED_LOOP: usize = 64;
    pub const FAULT_RESET: usize = 65;

    /// First index available to type fields.
    pub const TYPE_FIELDS: usize = 66;

    pub const NUM_ACCELERATION_PARAMS: usize = 4;
    pub const EXTENDED_STATUS_LENGTH: usize = 80;
}

/// Record and motor class fields for `subclass`. Type fields follow at [`mtr::TYPE_FIELDS`].
pub fn motor_fields(subclass: MotorSubclass) -> Vec<FieldDescriptor> {
    use FieldFlags as F;
    use FieldType::{Bool, Double, Hex, Long, ULong};
    const C: StorageSlot = StorageSlot::Class;

    let raw = match subclass {
        MotorSubclass::Stepper => Long,
        MotorSubclass::Analog => Double,
    };
    let mut offset = 0;
    let mut next = || {
        offset += 1;
        offset - 1
    };

    let mut fields = record_standard_fields();
    fields.extend([
        FieldDescriptor::new("raw_destination", raw, C, next()),
        FieldDescriptor::new("raw_position", raw, C, next())
            .flags(F::IN_DESCRIPTION | F::POLL | F::READ_ONLY),
        FieldDescriptor::new("raw_backlash_correction", raw, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("raw_negative_limit", raw, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("raw_positive_limit", raw, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("raw_move_deadband", raw, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("raw_set_position", raw, C, next()),
        FieldDescriptor::new("value_change_threshold", Double, C, next())
            .label(label::VALUE_CHANGE_THRESHOLD),
        FieldDescriptor::new("raw_minimum_speed_limit", Double, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("raw_maximum_speed_limit", Double, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("subclass", Long, C, next()).flags(F::READ_ONLY),
        FieldDescriptor::new("motor_flags", Hex, C, next()).flags(F::NO_TIMESTAMP),
        FieldDescriptor::new("scale", Double, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("offset", Double, C, next()).flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("units", FieldType::String, C, next())
            .fixed(&[UNITS_NAME_LENGTH])
            .flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("destination", Double, C, next()).label(label::DESTINATION),
        FieldDescriptor::new("old_destination", Double, C, next()),
        FieldDescriptor::new("position", Double, C, next())
            .label(label::POSITION)
            .flags(F::POLL | F::READ_ONLY)
            .value_changed(position_changed),
        FieldDescriptor::new("set_position", Double, C, next()).label(label::SET_POSITION),
        FieldDescriptor::new("backlash_move_in_progress", Bool, C, next()),
        FieldDescriptor::new("backlash_correction", Double, C, next())
            .label(label::BACKLASH_CORRECTION),
        FieldDescriptor::new("negative_limit", Double, C, next()),
        FieldDescriptor::new("positive_limit", Double, C, next()),
        FieldDescriptor::new("raw_speed", Double, C, next()),
        FieldDescriptor::new("raw_base_speed", Double, C, next()),
        FieldDescriptor::new("raw_maximum_speed", Double, C, next()),
        FieldDescriptor::new("speed", Double, C, next()).label(label::SPEED),
        FieldDescriptor::new("base_speed", Double, C, next()).label(label::BASE_SPEED),
        FieldDescriptor::new("maximum_speed", Double, C, next()).label(label::MAXIMUM_SPEED),
        FieldDescriptor::new("saved_speed", Double, C, next()),
        FieldDescriptor::new("save_speed", Bool, C, next()).label(label::SAVE_SPEED),
        FieldDescriptor::new("restore_speed", Bool, C, next()).label(label::RESTORE_SPEED),
        FieldDescriptor::new("synchronous_motion_mode", Bool, C, next())
            .label(label::SYNCHRONOUS_MOTION_MODE),
        FieldDescriptor::new("acceleration_type", Long, C, next()).label(label::ACCELERATION_TYPE),
        FieldDescriptor::new("raw_acceleration_parameters", Double, C, next())
            .fixed(&[mtr::NUM_ACCELERATION_PARAMS])
            .label(label::RAW_ACCELERATION_PARAMETERS),
        FieldDescriptor::new("acceleration_time", Double, C, next()).label(label::ACCELERATION_TIME),
        FieldDescriptor::new("acceleration_distance", Double, C, next())
            .label(label::ACCELERATION_DISTANCE),
        FieldDescriptor::new("busy", Bool, C, next())
            .label(label::BUSY)
            .flags(F::POLL),
        FieldDescriptor::new("busy_start_interval", Double, C, next())
            .label(label::BUSY_START_INTERVAL),
    ]);

    // `stop` is another name for `soft_abort`.
    let soft_abort = next();
    fields.extend([
        FieldDescriptor::new("soft_abort", Bool, C, soft_abort).label(label::SOFT_ABORT),
        FieldDescriptor::new("stop", Bool, C, soft_abort).label(label::SOFT_ABORT),
        FieldDescriptor::new("immediate_abort", Bool, C, next()).label(label::IMMEDIATE_ABORT),
        FieldDescriptor::new("negative_limit_hit", Bool, C, next())
            .label(label::NEGATIVE_LIMIT_HIT)
            .flags(F::POLL),
        FieldDescriptor::new("positive_limit_hit", Bool, C, next())
            .label(label::POSITIVE_LIMIT_HIT)
            .flags(F::POLL),
        FieldDescriptor::new("raw_home_command", Long, C, next()).label(label::RAW_HOME_COMMAND),
        FieldDescriptor::new("home_search", Long, C, next()).label(label::HOME_SEARCH),
        FieldDescriptor::new("home_search_type", ULong, C, next()).label(label::HOME_SEARCH_TYPE),
        FieldDescriptor::new("constant_velocity_move", Long, C, next())
            .label(label::CONSTANT_VELOCITY_MOVE),
        FieldDescriptor::new("status", Hex, C, next())
            .label(label::GET_STATUS)
            .flags(F::POLL),
        FieldDescriptor::new("extended_status", FieldType::String, C, next())
            .fixed(&[mtr::EXTENDED_STATUS_LENGTH])
            .label(label::GET_EXTENDED_STATUS)
            .flags(F::READ_ONLY),
        FieldDescriptor::new("axis_enable", Bool, C, next()).label(label::AXIS_ENABLE),
        FieldDescriptor::new("closed_loop", Bool, C, next()).label(label::CLOSED_LOOP),
        FieldDescriptor::new("fault_reset", Bool, C, next()).label(label::FAULT_RESET),
    ]);
    fields
}

/// Position changes count once they exceed `value_change_threshold`.
pub fn position_changed(record: &Record, field: usize, last: Option<&FieldValue>) -> Result<bool> {
    let current: f64 = record.read_index(field)?;
    let Some(last) = last else {
        return Ok(true);
    };
    let previous: f64 = last.read()?;
    let threshold: f64 = record.read_index(mtr::VALUE_CHANGE_THRESHOLD)?;
    Ok((current - previous).abs() > threshold)
}

/// Raw position-like field as a float, whatever the subclass stores.
pub(crate) fn raw_value(record: &Record, index: usize) -> Result<f64> {
    match record.value(index)?.get(0)? {
        Scalar::Long(v) => Ok(v as f64),
        Scalar::Double(v) => Ok(v),
        other => Err(RuntimeError::TypeMismatch(format!(
            "raw motor field holds a {} value",
            other.natural_type()
        ))),
    }
}

/// Stores a raw position-like field, rounding to whole steps for steppers.
pub(crate) fn set_raw_value(record: &mut Record, index: usize, value: f64) -> Result<()> {
    let scalar = match record.descriptor(index)?.datatype {
        FieldType::Long => Scalar::Long(value.round() as i64),
        _ => Scalar::Double(value),
    };
    record.write_index(index, scalar)
}
