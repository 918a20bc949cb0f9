//! Generic motor operations.
//!
//! These convert between user units (`position = scale * raw + offset`) and raw
//! units, enforce soft limits, deadband and backlash, and keep the cached motor
//! fields in step. Cached fields are only written after the driver call succeeds.

use crate::fields::{mtr, raw_value, set_raw_value};
use crate::{
    AccelerationType, MotorDriver, MotorFlags, MotorFunctions, MotorParameter, MotorStatus,
    MotorSubclass, MoveFlags,
};
use record_runtime::{
    ids, ClockTick, ErrorKind, FieldType, Record, RecordHandle, RecordList, Result, RuntimeError,
    Scalar,
};
use std::sync::Arc;
use tracing::debug;

/// Bookkeeping kept in the class state slot of every motor record.
#[derive(Debug, Default)]
pub(crate) struct MotorState {
    last_start: Option<ClockTick>,
    backlash_target: Option<f64>,
}

fn is_unsupported(err: &RuntimeError) -> bool {
    err.kind() == ErrorKind::Unsupported
}

fn driver(list: &RecordList, motor: RecordHandle) -> Result<Arc<dyn MotorDriver>> {
    let record = list.record(motor)?;
    if record.triple().class != ids::CLASS_MOTOR {
        return Err(RuntimeError::TypeMismatch(format!(
            "record '{}' is not a motor",
            record.name()
        )));
    }
    record
        .driver()
        .class_functions_as::<MotorFunctions>()
        .map(|functions| functions.0.clone())
        .ok_or_else(|| {
            RuntimeError::CorruptDataStructure(format!(
                "motor '{}' has no motor function table",
                record.name()
            ))
        })
}

fn state_mut(record: &mut Record) -> Result<&mut MotorState> {
    if record.class_state::<MotorState>().is_none() {
        return Err(RuntimeError::CorruptDataStructure(format!(
            "motor state for '{}' was never created",
            record.name()
        )));
    }
    record
        .class_state_mut::<MotorState>()
        .ok_or_else(|| RuntimeError::CorruptDataStructure("motor state vanished".into()))
}

fn to_raw(record: &Record, value: f64) -> Result<f64> {
    let scale: f64 = record.read_index(mtr::SCALE)?;
    let offset: f64 = record.read_index(mtr::OFFSET)?;
    if scale == 0.0 {
        return Err(RuntimeError::IllegalArgument(format!(
            "motor '{}' has a scale of zero",
            record.name()
        )));
    }
    Ok((value - offset) / scale)
}

fn to_user(record: &Record, raw: f64) -> Result<f64> {
    let scale: f64 = record.read_index(mtr::SCALE)?;
    let offset: f64 = record.read_index(mtr::OFFSET)?;
    Ok(scale * raw + offset)
}

fn field_as_f64(record: &Record, index: usize) -> Result<f64> {
    match record.value(index)?.get(0)? {
        Scalar::Double(v) => Ok(v),
        Scalar::Long(v) => Ok(v as f64),
        Scalar::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        other => Err(RuntimeError::TypeMismatch(format!(
            "motor parameter holds a {} value",
            other.natural_type()
        ))),
    }
}

/// Sets up the class state of a freshly allocated motor record.
///
/// Drivers call this from `create_record_structures`.
pub fn create_motor_structures(list: &mut RecordList, motor: RecordHandle) -> Result<()> {
    let record = list.record_mut(motor)?;
    let subclass = match record.descriptor(mtr::RAW_POSITION)?.datatype {
        FieldType::Long => MotorSubclass::Stepper,
        _ => MotorSubclass::Analog,
    };
    record.set_class_state(MotorState::default());
    record.write_index(mtr::SUBCLASS, Scalar::Long(subclass.code()))?;
    record.write_index(mtr::SCALE, Scalar::Double(1.0))
}

/// Derives the user-unit fields from the raw values read from the description.
///
/// Drivers call this from `finish_record_initialization`.
pub fn finish_motor_initialization(list: &mut RecordList, motor: RecordHandle) -> Result<()> {
    let record = list.record_mut(motor)?;
    let scale: f64 = record.read_index(mtr::SCALE)?;
    let mut negative = to_user(record, raw_value(record, mtr::RAW_NEGATIVE_LIMIT)?)?;
    let mut positive = to_user(record, raw_value(record, mtr::RAW_POSITIVE_LIMIT)?)?;
    if negative > positive {
        std::mem::swap(&mut negative, &mut positive);
    }
    record.write_index(mtr::NEGATIVE_LIMIT, Scalar::Double(negative))?;
    record.write_index(mtr::POSITIVE_LIMIT, Scalar::Double(positive))?;

    let backlash = raw_value(record, mtr::RAW_BACKLASH_CORRECTION)?;
    record.write_index(mtr::BACKLASH_CORRECTION, Scalar::Double(scale * backlash))?;

    let raw_position = raw_value(record, mtr::RAW_POSITION)?;
    let position = to_user(record, raw_position)?;
    set_raw_value(record, mtr::RAW_DESTINATION, raw_position)?;
    record.write_index(mtr::POSITION, Scalar::Double(position))?;
    record.write_index(mtr::DESTINATION, Scalar::Double(position))?;
    record.write_index(mtr::SET_POSITION, Scalar::Double(position))?;

    let raw_maximum: f64 = record.read_index(mtr::RAW_MAXIMUM_SPEED_LIMIT)?;
    if raw_maximum > 0.0 {
        record.write_index(mtr::RAW_MAXIMUM_SPEED, Scalar::Double(raw_maximum))?;
        record.write_index(mtr::MAXIMUM_SPEED, Scalar::Double(scale.abs() * raw_maximum))?;
    }
    Ok(())
}

pub fn subclass(list: &RecordList, motor: RecordHandle) -> Result<MotorSubclass> {
    let code: i64 = list.record(motor)?.read_index(mtr::SUBCLASS)?;
    if code == MotorSubclass::Stepper.code() {
        Ok(MotorSubclass::Stepper)
    } else {
        Ok(MotorSubclass::Analog)
    }
}

pub fn motor_flags(list: &RecordList, motor: RecordHandle) -> Result<MotorFlags> {
    let bits: u64 = list.record(motor)?.read_index(mtr::MOTOR_FLAGS)?;
    Ok(MotorFlags::from_bits_truncate(bits))
}

pub(crate) fn add_motor_flags(list: &mut RecordList, motor: RecordHandle, flags: MotorFlags) -> Result<()> {
    let current = motor_flags(list, motor)?;
    list.record_mut(motor)?
        .write_index(mtr::MOTOR_FLAGS, Scalar::ULong((current | flags).bits()))
}

pub fn is_pseudomotor(list: &RecordList, motor: RecordHandle) -> Result<bool> {
    Ok(motor_flags(list, motor)?.contains(MotorFlags::IS_PSEUDOMOTOR))
}

fn check_soft_limits(record: &Record, destination: f64) -> Result<()> {
    if !destination.is_finite() {
        return Err(RuntimeError::IllegalArgument(format!(
            "destination {destination} for '{}' is not a finite number",
            record.name()
        )));
    }
    let negative: f64 = record.read_index(mtr::NEGATIVE_LIMIT)?;
    let positive: f64 = record.read_index(mtr::POSITIVE_LIMIT)?;
    // Equal limits mean the motor has none.
    if negative < positive && (destination < negative || destination > positive) {
        return Err(RuntimeError::WouldExceedLimit(format!(
            "move of '{}' to {destination} is outside the limits [{negative}, {positive}]",
            record.name()
        )));
    }
    Ok(())
}

fn commit_move(
    list: &mut RecordList,
    motor: RecordHandle,
    raw_commanded: f64,
    pending: Option<f64>,
) -> Result<()> {
    let record = list.record_mut(motor)?;
    let raw_target = pending.unwrap_or(raw_commanded);
    let destination = to_user(record, raw_target)?;
    let previous: f64 = record.read_index(mtr::DESTINATION)?;
    record.write_index(mtr::OLD_DESTINATION, Scalar::Double(previous))?;
    set_raw_value(record, mtr::RAW_DESTINATION, raw_target)?;
    record.write_index(mtr::DESTINATION, Scalar::Double(destination))?;
    record.write_index(mtr::BACKLASH_MOVE_IN_PROGRESS, Scalar::Bool(pending.is_some()))?;
    let state = state_mut(record)?;
    state.backlash_target = pending;
    state.last_start = Some(ClockTick::now());
    debug!(
        record = %record.name(),
        destination,
        raw = raw_commanded,
        backlash = pending.is_some(),
        "motor move started"
    );
    if let Some(hub) = list.metrics() {
        hub.runtime.motor_moves.inc();
    }
    Ok(())
}

/// Starts a move to `destination` in user units. Does not wait for completion.
pub fn move_absolute(
    list: &mut RecordList,
    motor: RecordHandle,
    destination: f64,
    flags: MoveFlags,
) -> Result<()> {
    let functions = driver(list, motor)?;
    let (raw_destination, first_leg) = {
        let record = list.record(motor)?;
        check_soft_limits(record, destination)?;
        let raw_destination = to_raw(record, destination)?;
        if flags.contains(MoveFlags::ONLY_CHECK_LIMITS) {
            return Ok(());
        }
        let raw_position = raw_value(record, mtr::RAW_POSITION)?;
        let deadband = raw_value(record, mtr::RAW_MOVE_DEADBAND)?;
        if deadband > 0.0 && (raw_destination - raw_position).abs() <= deadband {
            debug!(record = %record.name(), destination, "move within deadband skipped");
            return Ok(());
        }
        // Positive backlash means the final approach is always in the positive direction.
        let backlash = raw_value(record, mtr::RAW_BACKLASH_CORRECTION)?;
        let against = (backlash > 0.0 && raw_destination < raw_position)
            || (backlash < 0.0 && raw_destination > raw_position);
        let first_leg = (against && !flags.contains(MoveFlags::IGNORE_BACKLASH))
            .then(|| raw_destination - backlash);
        (raw_destination, first_leg)
    };

    let commanded = first_leg.unwrap_or(raw_destination);
    functions.move_absolute(list, motor, commanded)?;
    let pending = if flags.contains(MoveFlags::GO_TO_BACKLASH_POSITION) {
        None
    } else {
        first_leg.map(|_| raw_destination)
    };
    commit_move(list, motor, commanded, pending)
}

pub fn move_relative(
    list: &mut RecordList,
    motor: RecordHandle,
    distance: f64,
    flags: MoveFlags,
) -> Result<()> {
    let position = get_position(list, motor)?;
    move_absolute(list, motor, position + distance, flags)
}

/// Polls the motor. When the first leg of a backlash move has finished, issues the
/// final leg and keeps reporting busy.
pub fn is_busy(list: &mut RecordList, motor: RecordHandle) -> Result<bool> {
    let functions = driver(list, motor)?;
    let mut busy = match functions.is_busy(list, motor) {
        Ok(busy) => busy,
        Err(e) if is_unsupported(&e) => functions.get_status(list, motor)?.contains(MotorStatus::BUSY),
        Err(e) => return Err(e),
    };

    let pending = {
        let record = list.record_mut(motor)?;
        let interval: f64 = record.read_index(mtr::BUSY_START_INTERVAL)?;
        let state = state_mut(record)?;
        if !busy && interval > 0.0 {
            if let Some(start) = state.last_start {
                busy = start.elapsed().as_seconds() < interval;
            }
        }
        if busy {
            None
        } else {
            state.backlash_target.take()
        }
    };

    if let Some(target) = pending {
        if let Err(e) = functions.move_absolute(list, motor, target) {
            state_mut(list.record_mut(motor)?)?.backlash_target = Some(target);
            return Err(e);
        }
        commit_move(list, motor, target, None)?;
        let name = list.name_of(motor)?;
        debug!(record = %name, "backlash correction final leg");
        busy = true;
    }

    list.record_mut(motor)?
        .write_index(mtr::BUSY, Scalar::Bool(busy))?;
    Ok(busy)
}

fn store_position(list: &mut RecordList, motor: RecordHandle, raw: f64) -> Result<f64> {
    let record = list.record_mut(motor)?;
    set_raw_value(record, mtr::RAW_POSITION, raw)?;
    let position = to_user(record, raw_value(record, mtr::RAW_POSITION)?)?;
    record.write_index(mtr::POSITION, Scalar::Double(position))?;
    Ok(position)
}

/// Reads the position from the driver, in user units.
pub fn get_position(list: &mut RecordList, motor: RecordHandle) -> Result<f64> {
    let functions = driver(list, motor)?;
    let raw = functions.get_position(list, motor)?;
    store_position(list, motor, raw)
}

/// Redefines the current position as `position` without moving.
pub fn set_position(list: &mut RecordList, motor: RecordHandle, position: f64) -> Result<()> {
    let functions = driver(list, motor)?;
    let raw = to_raw(list.record(motor)?, position)?;
    functions.set_position(list, motor, raw)?;
    let record = list.record_mut(motor)?;
    set_raw_value(record, mtr::RAW_SET_POSITION, raw)?;
    record.write_index(mtr::SET_POSITION, Scalar::Double(position))?;
    set_raw_value(record, mtr::RAW_DESTINATION, raw)?;
    record.write_index(mtr::DESTINATION, Scalar::Double(position))?;
    store_position(list, motor, raw)?;
    Ok(())
}

fn abort(list: &mut RecordList, motor: RecordHandle, immediate: bool) -> Result<()> {
    let functions = driver(list, motor)?;
    if immediate {
        functions.immediate_abort(list, motor)?;
    } else {
        functions.soft_abort(list, motor)?;
    }
    let record = list.record_mut(motor)?;
    record.write_index(mtr::BACKLASH_MOVE_IN_PROGRESS, Scalar::Bool(false))?;
    let state = state_mut(record)?;
    state.backlash_target = None;
    state.last_start = None;
    debug!(record = %record.name(), immediate, "motor stopped");
    Ok(())
}

/// Decelerates to a stop.
pub fn soft_abort(list: &mut RecordList, motor: RecordHandle) -> Result<()> {
    abort(list, motor, false)
}

/// Stops as fast as the hardware allows.
pub fn immediate_abort(list: &mut RecordList, motor: RecordHandle) -> Result<()> {
    abort(list, motor, true)
}

fn raw_direction(record: &Record, direction: i64) -> Result<i64> {
    let scale: f64 = record.read_index(mtr::SCALE)?;
    Ok(if scale < 0.0 { -direction } else { direction })
}

/// Starts a home search; a positive `direction` searches toward increasing user position.
pub fn home_search(list: &mut RecordList, motor: RecordHandle, direction: i64) -> Result<()> {
    let functions = driver(list, motor)?;
    let command = raw_direction(list.record(motor)?, direction)?;
    functions.raw_home_command(list, motor, command)?;
    let record = list.record_mut(motor)?;
    record.write_index(mtr::RAW_HOME_COMMAND, Scalar::Long(command))?;
    record.write_index(mtr::HOME_SEARCH, Scalar::Long(direction))?;
    state_mut(record)?.last_start = Some(ClockTick::now());
    Ok(())
}

pub fn constant_velocity_move(list: &mut RecordList, motor: RecordHandle, direction: i64) -> Result<()> {
    let functions = driver(list, motor)?;
    let raw = raw_direction(list.record(motor)?, direction)?;
    functions.constant_velocity_move(list, motor, raw)?;
    let record = list.record_mut(motor)?;
    record.write_index(mtr::CONSTANT_VELOCITY_MOVE, Scalar::Long(direction))?;
    state_mut(record)?.last_start = Some(ClockTick::now());
    Ok(())
}

fn limit_hit(list: &mut RecordList, motor: RecordHandle, positive: bool) -> Result<bool> {
    let functions = driver(list, motor)?;
    let scale: f64 = list.record(motor)?.read_index(mtr::SCALE)?;
    let raw_positive = positive == (scale >= 0.0);
    let answer = if raw_positive {
        functions.positive_limit_hit(list, motor)
    } else {
        functions.negative_limit_hit(list, motor)
    };
    let hit = match answer {
        Ok(hit) => hit,
        Err(e) if is_unsupported(&e) => {
            let bit = if raw_positive {
                MotorStatus::POSITIVE_LIMIT_HIT
            } else {
                MotorStatus::NEGATIVE_LIMIT_HIT
            };
            match functions.get_status(list, motor) {
                Ok(status) => status.contains(bit),
                Err(e) if is_unsupported(&e) => false,
                Err(e) => return Err(e),
            }
        }
        Err(e) => return Err(e),
    };
    let index = if positive {
        mtr::POSITIVE_LIMIT_HIT
    } else {
        mtr::NEGATIVE_LIMIT_HIT
    };
    list.record_mut(motor)?.write_index(index, Scalar::Bool(hit))?;
    Ok(hit)
}

pub fn positive_limit_hit(list: &mut RecordList, motor: RecordHandle) -> Result<bool> {
    limit_hit(list, motor, true)
}

pub fn negative_limit_hit(list: &mut RecordList, motor: RecordHandle) -> Result<bool> {
    limit_hit(list, motor, false)
}

fn optional(answer: Result<bool>) -> Result<bool> {
    match answer {
        Err(e) if is_unsupported(&e) => Ok(false),
        other => other,
    }
}

fn synthesize_status(
    functions: &dyn MotorDriver,
    list: &mut RecordList,
    motor: RecordHandle,
) -> Result<MotorStatus> {
    let mut status = MotorStatus::empty();
    status.set(MotorStatus::BUSY, optional(functions.is_busy(list, motor))?);
    status.set(
        MotorStatus::POSITIVE_LIMIT_HIT,
        optional(functions.positive_limit_hit(list, motor))?,
    );
    status.set(
        MotorStatus::NEGATIVE_LIMIT_HIT,
        optional(functions.negative_limit_hit(list, motor))?,
    );
    Ok(status)
}

fn store_status(list: &mut RecordList, motor: RecordHandle, status: MotorStatus) -> Result<()> {
    let record = list.record_mut(motor)?;
    record.write_index(mtr::STATUS, Scalar::ULong(status.bits()))?;
    record.write_index(mtr::BUSY, Scalar::Bool(status.contains(MotorStatus::BUSY)))?;
    record.write_index(
        mtr::POSITIVE_LIMIT_HIT,
        Scalar::Bool(status.contains(MotorStatus::POSITIVE_LIMIT_HIT)),
    )?;
    record.write_index(
        mtr::NEGATIVE_LIMIT_HIT,
        Scalar::Bool(status.contains(MotorStatus::NEGATIVE_LIMIT_HIT)),
    )
}

/// Status word from the driver, or built from is-busy and the limit switches
/// when the driver has no get-status.
pub fn get_status(list: &mut RecordList, motor: RecordHandle) -> Result<MotorStatus> {
    let functions = driver(list, motor)?;
    let status = match functions.get_status(list, motor) {
        Ok(status) => status,
        Err(e) if is_unsupported(&e) => synthesize_status(functions.as_ref(), list, motor)?,
        Err(e) => return Err(e),
    };
    store_status(list, motor, status)?;
    Ok(status)
}

/// Position in user units and status word together.
pub fn get_extended_status(list: &mut RecordList, motor: RecordHandle) -> Result<(f64, MotorStatus)> {
    let functions = driver(list, motor)?;
    let (position, status) = match functions.get_extended_status(list, motor) {
        Ok((raw, status)) => {
            let position = store_position(list, motor, raw)?;
            store_status(list, motor, status)?;
            (position, status)
        }
        Err(e) if is_unsupported(&e) => (get_position(list, motor)?, get_status(list, motor)?),
        Err(e) => return Err(e),
    };
    let text = format!("{position} {:x}", status.bits());
    list.record_mut(motor)?
        .write_index(mtr::EXTENDED_STATUS, Scalar::String(text))?;
    Ok((position, status))
}

fn parameter_fields(parameter: MotorParameter) -> &'static [usize] {
    match parameter {
        MotorParameter::Speed => &[mtr::SPEED, mtr::RAW_SPEED],
        MotorParameter::BaseSpeed => &[mtr::BASE_SPEED, mtr::RAW_BASE_SPEED],
        MotorParameter::MaximumSpeed => &[mtr::MAXIMUM_SPEED, mtr::RAW_MAXIMUM_SPEED],
        MotorParameter::AccelerationType => &[mtr::ACCELERATION_TYPE],
        MotorParameter::AccelerationTime => &[mtr::ACCELERATION_TIME],
        MotorParameter::AccelerationDistance => &[mtr::ACCELERATION_DISTANCE],
        MotorParameter::SaveSpeed => &[mtr::SAVE_SPEED, mtr::SAVED_SPEED],
        MotorParameter::RestoreSpeed => &[mtr::RESTORE_SPEED],
        MotorParameter::SynchronousMotionMode => &[mtr::SYNCHRONOUS_MOTION_MODE],
        MotorParameter::BusyStartInterval => &[mtr::BUSY_START_INTERVAL],
        MotorParameter::AxisEnable => &[mtr::AXIS_ENABLE],
        MotorParameter::ClosedLoop => &[mtr::CLOSED_LOOP],
        MotorParameter::FaultReset => &[mtr::FAULT_RESET],
    }
}

fn software_get(record: &mut Record, parameter: MotorParameter) -> Result<()> {
    let scale: f64 = record.read_index(mtr::SCALE)?;
    match parameter {
        MotorParameter::Speed | MotorParameter::BaseSpeed | MotorParameter::MaximumSpeed => {
            let [user, raw] = parameter_fields(parameter) else {
                return Ok(());
            };
            let raw_speed: f64 = record.read_index(*raw)?;
            record.write_index(*user, Scalar::Double(scale.abs() * raw_speed))
        }
        MotorParameter::AccelerationDistance => {
            let kind: i64 = record.read_index(mtr::ACCELERATION_TYPE)?;
            if kind != AccelerationType::Time.code() {
                return Ok(());
            }
            let speed: f64 = record.read_index(mtr::SPEED)?;
            let time: f64 = record.read_index(mtr::ACCELERATION_TIME)?;
            record.write_index(mtr::ACCELERATION_DISTANCE, Scalar::Double(0.5 * speed * time))
        }
        _ => Ok(()),
    }
}

/// Reads a motor parameter in user units, letting the driver refresh it first.
pub fn get_parameter(list: &mut RecordList, motor: RecordHandle, parameter: MotorParameter) -> Result<f64> {
    let functions = driver(list, motor)?;
    match functions.get_parameter(list, motor, parameter) {
        Ok(()) => {}
        Err(e) if is_unsupported(&e) => software_get(list.record_mut(motor)?, parameter)?,
        Err(e) => return Err(e),
    }
    field_as_f64(list.record(motor)?, parameter_fields(parameter)[0])
}

fn stage_speed(record: &mut Record, user: usize, raw: usize, value: f64) -> Result<()> {
    if value < 0.0 {
        return Err(RuntimeError::IllegalArgument(format!(
            "speed {value} for motor '{}' is negative",
            record.name()
        )));
    }
    let scale: f64 = record.read_index(mtr::SCALE)?;
    if scale == 0.0 {
        return Err(RuntimeError::IllegalArgument(format!(
            "motor '{}' has a scale of zero",
            record.name()
        )));
    }
    let raw_speed = value / scale.abs();
    let minimum: f64 = record.read_index(mtr::RAW_MINIMUM_SPEED_LIMIT)?;
    let maximum: f64 = record.read_index(mtr::RAW_MAXIMUM_SPEED_LIMIT)?;
    if raw_speed < minimum || (maximum > 0.0 && raw_speed > maximum) {
        return Err(RuntimeError::WouldExceedLimit(format!(
            "raw speed {raw_speed} for motor '{}' is outside [{minimum}, {maximum}]",
            record.name()
        )));
    }
    record.write_index(raw, Scalar::Double(raw_speed))?;
    record.write_index(user, Scalar::Double(value))
}

fn stage_parameter(record: &mut Record, parameter: MotorParameter, value: f64) -> Result<()> {
    match parameter {
        MotorParameter::Speed => stage_speed(record, mtr::SPEED, mtr::RAW_SPEED, value),
        MotorParameter::BaseSpeed => stage_speed(record, mtr::BASE_SPEED, mtr::RAW_BASE_SPEED, value),
        MotorParameter::MaximumSpeed => {
            stage_speed(record, mtr::MAXIMUM_SPEED, mtr::RAW_MAXIMUM_SPEED, value)
        }
        MotorParameter::AccelerationType => {
            let kind = AccelerationType::from_code(value as i64).ok_or_else(|| {
                RuntimeError::IllegalArgument(format!("unknown acceleration type {value}"))
            })?;
            record.write_index(mtr::ACCELERATION_TYPE, Scalar::Long(kind.code()))
        }
        MotorParameter::AccelerationTime
        | MotorParameter::AccelerationDistance
        | MotorParameter::BusyStartInterval => {
            if value < 0.0 {
                return Err(RuntimeError::IllegalArgument(format!(
                    "{parameter:?} cannot be negative"
                )));
            }
            record.write_index(parameter_fields(parameter)[0], Scalar::Double(value))
        }
        MotorParameter::SaveSpeed => {
            let speed: f64 = record.read_index(mtr::SPEED)?;
            record.write_index(mtr::SAVED_SPEED, Scalar::Double(speed))?;
            record.write_index(mtr::SAVE_SPEED, Scalar::Bool(true))
        }
        MotorParameter::RestoreSpeed
        | MotorParameter::SynchronousMotionMode
        | MotorParameter::AxisEnable
        | MotorParameter::ClosedLoop
        | MotorParameter::FaultReset => {
            record.write_index(parameter_fields(parameter)[0], Scalar::Bool(value != 0.0))
        }
    }
}

/// Sets a motor parameter in user units.
///
/// The fields are updated first and the driver is told afterwards; a driver
/// without set-parameter support keeps the software value. A driver failure
/// puts the previous values back.
pub fn set_parameter(
    list: &mut RecordList,
    motor: RecordHandle,
    parameter: MotorParameter,
    value: f64,
) -> Result<()> {
    if parameter == MotorParameter::RestoreSpeed {
        let saved: f64 = list.record(motor)?.read_index(mtr::SAVED_SPEED)?;
        set_parameter(list, motor, MotorParameter::Speed, saved)?;
        return list
            .record_mut(motor)?
            .write_index(mtr::RESTORE_SPEED, Scalar::Bool(true));
    }
    let functions = driver(list, motor)?;
    let snapshot = {
        let record = list.record_mut(motor)?;
        let snapshot = parameter_fields(parameter)
            .iter()
            .map(|&i| Ok((i, record.value(i)?.get(0)?)))
            .collect::<Result<Vec<_>>>()?;
        stage_parameter(record, parameter, value)?;
        snapshot
    };
    match functions.set_parameter(list, motor, parameter) {
        Ok(()) => {}
        Err(e) if is_unsupported(&e) => {}
        Err(e) => {
            let record = list.record_mut(motor)?;
            for (index, previous) in snapshot {
                record.write_index(index, previous)?;
            }
            return Err(e);
        }
    }
    let name = list.name_of(motor)?;
    debug!(record = %name, ?parameter, value, "motor parameter set");
    Ok(())
}

pub fn get_speed(list: &mut RecordList, motor: RecordHandle) -> Result<f64> {
    get_parameter(list, motor, MotorParameter::Speed)
}

pub fn set_speed(list: &mut RecordList, motor: RecordHandle, speed: f64) -> Result<()> {
    set_parameter(list, motor, MotorParameter::Speed, speed)
}

/// Starts several motors together.
///
/// Every destination is limit-checked before anything moves. Motors sharing one
/// driver type are started through its simultaneous-start slot when it has one;
/// otherwise they are started one after another without waiting.
pub fn simultaneous_start(
    list: &mut RecordList,
    motors: &[RecordHandle],
    destinations: &[f64],
    flags: MoveFlags,
) -> Result<()> {
    if motors.len() != destinations.len() {
        return Err(RuntimeError::IllegalArgument(format!(
            "{} motors but {} destinations",
            motors.len(),
            destinations.len()
        )));
    }
    let Some(&first) = motors.first() else {
        return Ok(());
    };
    for (&motor, &destination) in motors.iter().zip(destinations) {
        move_absolute(list, motor, destination, MoveFlags::ONLY_CHECK_LIMITS)?;
    }
    if flags.contains(MoveFlags::ONLY_CHECK_LIMITS) {
        return Ok(());
    }

    let functions = driver(list, first)?;
    let triple = list.record(first)?.triple();
    let mut same_driver = true;
    for &motor in motors {
        same_driver &= list.record(motor)?.triple() == triple;
    }
    if same_driver {
        let raw = motors
            .iter()
            .zip(destinations)
            .map(|(&motor, &destination)| to_raw(list.record(motor)?, destination))
            .collect::<Result<Vec<_>>>()?;
        match functions.simultaneous_start(list, motors, &raw, flags) {
            Ok(()) => {
                for (&motor, &raw_destination) in motors.iter().zip(&raw) {
                    commit_move(list, motor, raw_destination, None)?;
                }
                return Ok(());
            }
            Err(e) if is_unsupported(&e) => {}
            Err(e) => return Err(e),
        }
    }
    debug!(count = motors.len(), "simultaneous start issued as sequential moves");
    for (&motor, &destination) in motors.iter().zip(destinations) {
        move_absolute(list, motor, destination, flags | MoveFlags::NOWAIT)?;
    }
    Ok(())
}
