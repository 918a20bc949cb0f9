//! record-motor: the motor device class on top of record-runtime, with a
//! software motor and the ADSC two-theta pseudo-motor

mod types;
pub use types::*;

pub mod fields;
pub use fields::{motor_fields, mtr, position_changed};

mod traits;
pub use traits::{MotorDriver, MotorFunctions};

pub mod ops;

mod transform;
pub use transform::{TwoThetaGeometry, ADSC_D1_MM, ADSC_D2_MM};

mod two_theta;
pub use two_theta::{tt, two_theta_driver, AdscTwoTheta};

#[cfg(feature = "mock")]
mod soft;
#[cfg(feature = "mock")]
pub use soft::{soft_motor_drivers, SoftMotor, SOFT_DEFAULT_SPEED};

use record_runtime::{ids, DriverEntry, DriverRegistry, Result};

pub const MOTOR_CLASS_NAME: &str = "motor";

/// Every motor driver this crate provides.
pub fn motor_drivers() -> Vec<DriverEntry> {
    #[allow(unused_mut)]
    let mut drivers = vec![two_theta_driver()];
    #[cfg(feature = "mock")]
    drivers.extend(soft_motor_drivers());
    drivers
}

/// Registers the `motor` class and its drivers.
pub fn register_motor_drivers(registry: &mut DriverRegistry) -> Result<()> {
    registry.register_class(MOTOR_CLASS_NAME, ids::SUPERCLASS_DEVICE, ids::CLASS_MOTOR)?;
    registry.register(motor_drivers())
}

#[cfg(all(test, feature = "mock"))]
pub(crate) mod testing;
