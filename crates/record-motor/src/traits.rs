use crate::{MotorParameter, MotorStatus, MoveFlags};
use record_runtime::{RecordHandle, RecordList, Result, RuntimeError};
use std::sync::Arc;

/// Device-specific half of the motor class.
///
/// Every slot is optional; an absent slot reports `Unsupported`. Positions passed
/// in and returned are raw (unscaled) values, and the generic layer in
/// [`crate::ops`] owns scaling, limits and the cached fields.
pub trait MotorDriver: Send + Sync {
    fn is_busy(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<bool> {
        Err(RuntimeError::unsupported("is-busy"))
    }

    fn move_absolute(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _raw_destination: f64,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("move-absolute"))
    }

    fn get_position(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<f64> {
        Err(RuntimeError::unsupported("get-position"))
    }

    fn set_position(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _raw_position: f64,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("set-position"))
    }

    fn soft_abort(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<()> {
        Err(RuntimeError::unsupported("soft-abort"))
    }

    fn immediate_abort(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<()> {
        Err(RuntimeError::unsupported("immediate-abort"))
    }

    /// Starts a home search; the sign of `command` gives the raw direction.
    fn raw_home_command(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _command: i64,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("home-search"))
    }

    fn constant_velocity_move(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _direction: i64,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("constant-velocity-move"))
    }

    /// Refreshes the field behind `parameter` from the hardware.
    fn get_parameter(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _parameter: MotorParameter,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("get-parameter"))
    }

    /// Pushes the already updated field behind `parameter` to the hardware.
    fn set_parameter(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
        _parameter: MotorParameter,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("set-parameter"))
    }

    /// Starts every motor in `motors` at once. All of them use this driver.
    fn simultaneous_start(
        &self,
        _list: &mut RecordList,
        _motors: &[RecordHandle],
        _raw_destinations: &[f64],
        _flags: MoveFlags,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("simultaneous-start"))
    }

    fn positive_limit_hit(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<bool> {
        Err(RuntimeError::unsupported("positive-limit-hit"))
    }

    fn negative_limit_hit(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<bool> {
        Err(RuntimeError::unsupported("negative-limit-hit"))
    }

    fn get_status(&self, _list: &mut RecordList, _motor: RecordHandle) -> Result<MotorStatus> {
        Err(RuntimeError::unsupported("get-status"))
    }

    /// Raw position and status in one call.
    fn get_extended_status(
        &self,
        _list: &mut RecordList,
        _motor: RecordHandle,
    ) -> Result<(f64, MotorStatus)> {
        Err(RuntimeError::unsupported("get-extended-status"))
    }
}

/// Class function table as stored in a driver entry.
pub struct MotorFunctions(pub Arc<dyn MotorDriver>);
