use crate::fields::{motor_fields, mtr, raw_value};
use crate::{ops, MotorDriver, MotorFunctions, MotorSubclass, MXT_MTR_SOFTWARE, MXT_MTR_SOFTWARE_STEPPER};
use record_runtime::{
    ids, ClockTick, DriverEntry, FieldDescriptor, FieldFlags, FieldType, RecordDriver, RecordHandle,
    RecordList, Result, RuntimeError, StorageSlot, TypeTriple,
};
use std::sync::Arc;
use tracing::trace;

/// Index of the `default_speed` type field.
pub const SOFT_DEFAULT_SPEED: usize = mtr::TYPE_FIELDS;

/// Simulated trajectory of a software motor, in raw units.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SoftMotion {
    from: f64,
    to: f64,
    started: ClockTick,
    speed: f64,
    moving: bool,
}

impl SoftMotion {
    fn at(position: f64) -> Self {
        Self {
            from: position,
            to: position,
            started: ClockTick::now(),
            speed: 0.0,
            moving: false,
        }
    }

    /// Current position and whether the move is still running.
    fn sample(&self) -> (f64, bool) {
        if !self.moving || self.speed <= 0.0 {
            return (self.to, false);
        }
        let distance = self.to - self.from;
        let travelled = self.speed * self.started.elapsed().as_seconds();
        if travelled >= distance.abs() {
            (self.to, false)
        } else {
            (self.from + travelled.copysign(distance), true)
        }
    }
}

/// Motor with no hardware behind it. Moves take `distance / raw_speed` seconds,
/// or complete at once when the speed is zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftMotor;

fn motion(list: &RecordList, motor: RecordHandle) -> Result<SoftMotion> {
    let record = list.record(motor)?;
    record.type_state::<SoftMotion>().copied().ok_or_else(|| {
        RuntimeError::CorruptDataStructure(format!(
            "software motor '{}' has no motion state",
            record.name()
        ))
    })
}

fn store(list: &mut RecordList, motor: RecordHandle, state: SoftMotion) -> Result<()> {
    list.record_mut(motor)?.set_type_state(state);
    Ok(())
}

fn start(list: &mut RecordList, motor: RecordHandle, target: f64) -> Result<()> {
    let (position, _) = motion(list, motor)?.sample();
    let speed: f64 = list.record(motor)?.read_index(mtr::RAW_SPEED)?;
    let name = list.name_of(motor)?;
    trace!(record = %name, from = position, to = target, speed, "soft motor move");
    store(
        list,
        motor,
        SoftMotion {
            from: position,
            to: target,
            started: ClockTick::now(),
            speed,
            moving: true,
        },
    )
}

fn freeze(list: &mut RecordList, motor: RecordHandle) -> Result<()> {
    let (position, _) = motion(list, motor)?.sample();
    store(list, motor, SoftMotion::at(position))
}

impl RecordDriver for SoftMotor {
    fn create_record_structures(&self, list: &mut RecordList, record: RecordHandle) -> Result<()> {
        ops::create_motor_structures(list, record)?;
        store(list, record, SoftMotion::at(0.0))
    }

    fn finish_record_initialization(&self, list: &mut RecordList, record: RecordHandle) -> Result<()> {
        ops::finish_motor_initialization(list, record)?;
        let (raw_position, speed) = {
            let r = list.record(record)?;
            (raw_value(r, mtr::RAW_POSITION)?, r.read_index::<f64>(SOFT_DEFAULT_SPEED)?)
        };
        store(list, record, SoftMotion::at(raw_position))?;
        if speed > 0.0 {
            ops::set_speed(list, record, speed)?;
        }
        Ok(())
    }
}

impl MotorDriver for SoftMotor {
    fn is_busy(&self, list: &mut RecordList, motor: RecordHandle) -> Result<bool> {
        let state = motion(list, motor)?;
        let (position, busy) = state.sample();
        if state.moving && !busy {
            store(list, motor, SoftMotion::at(position))?;
        }
        Ok(busy)
    }

    fn move_absolute(&self, list: &mut RecordList, motor: RecordHandle, raw_destination: f64) -> Result<()> {
        start(list, motor, raw_destination)
    }

    fn get_position(&self, list: &mut RecordList, motor: RecordHandle) -> Result<f64> {
        Ok(motion(list, motor)?.sample().0)
    }

    fn set_position(&self, list: &mut RecordList, motor: RecordHandle, raw_position: f64) -> Result<()> {
        store(list, motor, SoftMotion::at(raw_position))
    }

    fn soft_abort(&self, list: &mut RecordList, motor: RecordHandle) -> Result<()> {
        freeze(list, motor)
    }

    fn immediate_abort(&self, list: &mut RecordList, motor: RecordHandle) -> Result<()> {
        freeze(list, motor)
    }

    /// Home is raw zero.
    fn raw_home_command(&self, list: &mut RecordList, motor: RecordHandle, _command: i64) -> Result<()> {
        start(list, motor, 0.0)
    }

    /// Runs toward the raw limit on the requested side.
    fn constant_velocity_move(&self, list: &mut RecordList, motor: RecordHandle, direction: i64) -> Result<()> {
        let limit = if direction >= 0 {
            mtr::RAW_POSITIVE_LIMIT
        } else {
            mtr::RAW_NEGATIVE_LIMIT
        };
        let target = raw_value(list.record(motor)?, limit)?;
        start(list, motor, target)
    }
}

/// Driver entries for `soft_motor` (analog) and `soft_stepper`.
pub fn soft_motor_drivers() -> Vec<DriverEntry> {
    let driver = Arc::new(SoftMotor);
    [
        ("soft_motor", MXT_MTR_SOFTWARE, MotorSubclass::Analog),
        ("soft_stepper", MXT_MTR_SOFTWARE_STEPPER, MotorSubclass::Stepper),
    ]
    .into_iter()
    .map(|(name, type_id, subclass)| {
        let mut fields = motor_fields(subclass);
        fields.push(
            FieldDescriptor::new("default_speed", FieldType::Double, StorageSlot::Type, 0)
                .flags(FieldFlags::IN_DESCRIPTION),
        );
        DriverEntry::new(
            name,
            TypeTriple::new(ids::SUPERCLASS_DEVICE, ids::CLASS_MOTOR, type_id),
            driver.clone(),
            fields,
        )
        .with_class_functions(Arc::new(MotorFunctions(driver.clone())))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{load, motor_list, soft_line};
    use crate::MoveFlags;

    #[test]
    fn test_timed_move_and_abort() {
        let mut list = motor_list();
        let line = "x device motor soft_motor \"\" 0.0 0.0 -5000.0 5000.0 0.0 0.0 0.0 1.0 0.0 \"mm\" 1.0";
        let h = load(&mut list, &[line.to_string()])[0];
        assert_eq!(list.record(h).unwrap().read::<f64>("speed").unwrap(), 1.0);

        ops::move_absolute(&mut list, h, 1000.0, MoveFlags::empty()).unwrap();
        assert!(ops::is_busy(&mut list, h).unwrap());
        ops::soft_abort(&mut list, h).unwrap();
        assert!(!ops::is_busy(&mut list, h).unwrap());
        let stopped = ops::get_position(&mut list, h).unwrap();
        assert!((0.0..1000.0).contains(&stopped));
        assert_eq!(ops::get_position(&mut list, h).unwrap(), stopped);
    }

    #[test]
    fn test_home_and_constant_velocity() {
        let mut list = motor_list();
        let h = load(&mut list, &[soft_line("x", "-20.0", "30.0")])[0];
        ops::move_absolute(&mut list, h, 7.0, MoveFlags::empty()).unwrap();
        ops::home_search(&mut list, h, 1).unwrap();
        assert_eq!(ops::get_position(&mut list, h).unwrap(), 0.0);
        assert_eq!(list.record(h).unwrap().read::<i64>("home_search").unwrap(), 1);

        ops::constant_velocity_move(&mut list, h, -1).unwrap();
        assert_eq!(ops::get_position(&mut list, h).unwrap(), -20.0);
    }

    #[test]
    fn test_description_round_trip() {
        let mut list = motor_list();
        let line = soft_line("x", "-500.0", "500.0");
        let h = load(&mut list, &[line.clone()])[0];
        assert_eq!(list.create_description_from_record(h).unwrap(), line);
    }
}
