//! ADSC detector two-theta arm driven through a linear height motor.

use crate::fields::{motor_fields, mtr};
use crate::transform::TwoThetaGeometry;
use crate::{ops, MotorDriver, MotorFlags, MotorFunctions, MotorStatus, MotorSubclass, MoveFlags, MXT_MTR_ADSC_TWO_THETA};
use record_runtime::{
    ids, DriverEntry, FieldDescriptor, FieldFlags, FieldType, RecordDriver, RecordHandle, RecordList,
    Result, RuntimeError, Scalar, StorageSlot, TypeTriple,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod tt {
    use crate::fields::mtr;

    pub const HEIGHT_MOTOR_RECORD: usize = mtr::TYPE_FIELDS;
    pub const D1: usize = mtr::TYPE_FIELDS + 1;
    pub const D2: usize = mtr::TYPE_FIELDS + 2;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AdscTwoTheta;

fn geometry(list: &RecordList, motor: RecordHandle) -> Result<(TwoThetaGeometry, RecordHandle)> {
    let record = list.record(motor)?;
    let height: Option<RecordHandle> = record.read_index(tt::HEIGHT_MOTOR_RECORD)?;
    let height = match height {
        Some(h) if !list.is_placeholder(h) => h,
        _ => {
            return Err(RuntimeError::CorruptDataStructure(format!(
                "height motor of '{}' is not resolved",
                record.name()
            )))
        }
    };
    let geometry = TwoThetaGeometry::new(record.read_index(tt::D1)?, record.read_index(tt::D2)?);
    Ok((geometry, height))
}

impl RecordDriver for AdscTwoTheta {
    fn create_record_structures(&self, list: &mut RecordList, record: RecordHandle) -> Result<()> {
        ops::create_motor_structures(list, record)?;
        let defaults = TwoThetaGeometry::default();
        let r = list.record_mut(record)?;
        r.write_index(tt::D1, Scalar::Double(defaults.d1))?;
        r.write_index(tt::D2, Scalar::Double(defaults.d2))
    }

    fn finish_record_initialization(&self, list: &mut RecordList, record: RecordHandle) -> Result<()> {
        ops::finish_motor_initialization(list, record)?;
        let (_, height) = geometry(list, record)?;
        let height_record = list.record(height)?;
        if height_record.triple().class != ids::CLASS_MOTOR {
            return Err(RuntimeError::TypeMismatch(format!(
                "height record '{}' of '{}' is not a motor",
                height_record.name(),
                list.name_of(record)?
            )));
        }
        ops::add_motor_flags(list, record, MotorFlags::IS_PSEUDOMOTOR)?;
        let (name, height_name) = (list.name_of(record)?, list.name_of(height)?);
        debug!(record = %name, height = %height_name, "two-theta linked");
        Ok(())
    }

    fn print_structure(&self, list: &RecordList, record: RecordHandle, out: &mut dyn fmt::Write) -> Result<()> {
        let (_, height) = geometry(list, record)?;
        report(list, record, height, out)
            .map_err(|e| RuntimeError::FunctionFailed(format!("writing motor report: {e}")))
    }
}

fn report(list: &RecordList, record: RecordHandle, height: RecordHandle, out: &mut dyn fmt::Write) -> fmt::Result {
    let Ok(r) = list.record(record) else {
        return Err(fmt::Error);
    };
    let height_name = list.name_of(height).map_err(|_| fmt::Error)?;
    let value = |index: usize| r.read_index::<f64>(index).unwrap_or(f64::NAN);
    let units = r.read_index::<String>(mtr::UNITS).unwrap_or_default();
    let p = usize::try_from(r.precision()).unwrap_or(0);

    writeln!(out, "MOTOR parameters for motor '{}':", r.name())?;
    writeln!(out, "  Motor type             = ADSC_TWO_THETA.\n")?;
    writeln!(out, "  name                   = {}", r.name())?;
    writeln!(out, "  height motor record    = {height_name}")?;
    writeln!(
        out,
        "  position               = {:.p$} {units}  ({:.p$})",
        value(mtr::POSITION),
        value(mtr::RAW_POSITION)
    )?;
    writeln!(out, "  scale                  = {:.p$} {units} per degree.", value(mtr::SCALE))?;
    writeln!(out, "  offset                 = {:.p$} {units}.", value(mtr::OFFSET))?;
    for (label, user, raw) in [
        ("backlash      ", mtr::BACKLASH_CORRECTION, mtr::RAW_BACKLASH_CORRECTION),
        ("negative limit", mtr::NEGATIVE_LIMIT, mtr::RAW_NEGATIVE_LIMIT),
        ("positive limit", mtr::POSITIVE_LIMIT, mtr::RAW_POSITIVE_LIMIT),
    ] {
        writeln!(out, "  {label}         = {:.p$} {units}  ({:.p$}).", value(user), value(raw))?;
    }
    let deadband = value(mtr::RAW_MOVE_DEADBAND);
    writeln!(
        out,
        "  move deadband          = {:.p$} {units}  ({deadband:.p$}).",
        value(mtr::SCALE) * deadband
    )
}

impl MotorDriver for AdscTwoTheta {
    fn is_busy(&self, list: &mut RecordList, motor: RecordHandle) -> Result<bool> {
        let (_, height) = geometry(list, motor)?;
        ops::is_busy(list, height)
    }

    fn move_absolute(&self, list: &mut RecordList, motor: RecordHandle, raw_destination: f64) -> Result<()> {
        let (geometry, height) = geometry(list, motor)?;
        ops::move_absolute(list, height, geometry.height(raw_destination), MoveFlags::empty())
    }

    fn get_position(&self, list: &mut RecordList, motor: RecordHandle) -> Result<f64> {
        let (geometry, height) = geometry(list, motor)?;
        let h = ops::get_position(list, height)?;
        geometry.two_theta(h)
    }

    fn set_position(&self, list: &mut RecordList, motor: RecordHandle, raw_position: f64) -> Result<()> {
        let (geometry, height) = geometry(list, motor)?;
        ops::set_position(list, height, geometry.height(raw_position))
    }

    fn soft_abort(&self, list: &mut RecordList, motor: RecordHandle) -> Result<()> {
        let (_, height) = geometry(list, motor)?;
        ops::soft_abort(list, height)
    }

    fn immediate_abort(&self, list: &mut RecordList, motor: RecordHandle) -> Result<()> {
        let (_, height) = geometry(list, motor)?;
        ops::immediate_abort(list, height)
    }

    fn get_status(&self, list: &mut RecordList, motor: RecordHandle) -> Result<MotorStatus> {
        let (_, height) = geometry(list, motor)?;
        ops::get_status(list, height)
    }
}

/// Driver entry for `adsc_two_theta`.
pub fn two_theta_driver() -> DriverEntry {
    use FieldFlags as F;
    let driver = Arc::new(AdscTwoTheta);
    let mut fields = motor_fields(MotorSubclass::Analog);
    fields.extend([
        FieldDescriptor::new("height_motor_record", FieldType::Record, StorageSlot::Type, 0)
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY),
        FieldDescriptor::new("d1", FieldType::Double, StorageSlot::Type, 1),
        FieldDescriptor::new("d2", FieldType::Double, StorageSlot::Type, 2),
    ]);
    DriverEntry::new(
        "adsc_two_theta",
        TypeTriple::new(ids::SUPERCLASS_DEVICE, ids::CLASS_MOTOR, MXT_MTR_ADSC_TWO_THETA),
        driver.clone(),
        fields,
    )
    .with_class_functions(Arc::new(MotorFunctions(driver)))
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::testing::{load, motor_list, soft_line};
    use record_runtime::{CreationFlags, ErrorKind};

    const TWO_THETA: &str =
        "two_theta device motor adsc_two_theta \"\" 0.0 0.0 -30.0 60.0 0.0 0.0 0.0 1.0 0.0 \"deg\" height";

    fn setup(height_line: String) -> (RecordList, RecordHandle, RecordHandle) {
        let mut list = motor_list();
        let handles = load(&mut list, &[TWO_THETA.to_string(), height_line]);
        (list, handles[0], handles[1])
    }

    #[test]
    fn test_move_reaches_height_and_reads_back() {
        let (mut list, two_theta, height) = setup(soft_line("height", "-1000.0", "1000.0"));
        assert!(ops::is_pseudomotor(&list, two_theta).unwrap());
        assert_eq!(list.dependencies(two_theta).unwrap(), vec![height]);

        ops::move_absolute(&mut list, two_theta, 15.0, MoveFlags::empty()).unwrap();
        let destination: f64 = list.record(height).unwrap().read("destination").unwrap();
        assert!((destination - TwoThetaGeometry::default().height(15.0)).abs() < 1e-9);
        assert!((destination - 178.918_014_725).abs() < 1e-6);

        let position = ops::get_position(&mut list, two_theta).unwrap();
        assert!((position - 15.0).abs() < 1e-9);
        assert!(!ops::is_busy(&mut list, two_theta).unwrap());
    }

    #[test]
    fn test_abort_is_forwarded() {
        let line = "height device motor soft_motor \"\" 0.0 0.0 -1000.0 1000.0 0.0 0.0 0.0 1.0 0.0 \"mm\" 1.0";
        let (mut list, two_theta, height) = setup(line.to_string());
        ops::move_absolute(&mut list, two_theta, 15.0, MoveFlags::empty()).unwrap();
        assert!(ops::is_busy(&mut list, two_theta).unwrap());
        assert!(ops::get_status(&mut list, two_theta).unwrap().contains(MotorStatus::BUSY));

        ops::soft_abort(&mut list, two_theta).unwrap();
        assert!(!ops::is_busy(&mut list, height).unwrap());
        assert!(ops::get_position(&mut list, height).unwrap() < 178.0);
    }

    #[test]
    fn test_limits_checked_before_delegating() {
        let (mut list, two_theta, height) = setup(soft_line("height", "-1000.0", "1000.0"));
        let err = ops::move_absolute(&mut list, two_theta, 75.0, MoveFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldExceedLimit);
        assert_eq!(list.record(height).unwrap().read::<f64>("destination").unwrap(), 0.0);

        // The height motor's own limits still apply to the delegated move.
        let (mut list, two_theta, _) = setup(soft_line("height", "-100.0", "100.0"));
        let err = ops::move_absolute(&mut list, two_theta, 15.0, MoveFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldExceedLimit);
        assert_eq!(list.record(two_theta).unwrap().read::<f64>("destination").unwrap(), 0.0);
    }

    #[test]
    fn test_set_position_and_geometry_failure() {
        let (mut list, two_theta, height) = setup(soft_line("height", "-1000.0", "1000.0"));
        ops::set_position(&mut list, two_theta, 30.0).unwrap();
        let h = ops::get_position(&mut list, height).unwrap();
        assert!((h - TwoThetaGeometry::default().height(30.0)).abs() < 1e-9);

        list.write_field(two_theta, "d1", 700.0f64).unwrap();
        list.write_field(two_theta, "d2", 300.0f64).unwrap();
        ops::set_position(&mut list, height, 700.0).unwrap();
        let err = ops::get_position(&mut list, two_theta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }

    #[test]
    fn test_missing_height_motor() {
        let mut list = motor_list();
        let err = list
            .load_descriptions([TWO_THETA], CreationFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_structure_report() {
        let (list, two_theta, _) = setup(soft_line("height", "-1000.0", "1000.0"));
        let mut text = String::new();
        list.print_structure(two_theta, &mut text).unwrap();
        assert!(text.contains("Motor type             = ADSC_TWO_THETA."));
        assert!(text.contains("height motor record    = height"));
        assert!(text.contains("positive limit"));
    }
}
