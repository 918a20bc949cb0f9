use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Type id of the software motor driver.
pub const MXT_MTR_SOFTWARE: i64 = 50000;
/// Type id of the software stepper driver.
pub const MXT_MTR_SOFTWARE_STEPPER: i64 = 50001;
/// Type id of the ADSC two-theta pseudo-motor.
pub const MXT_MTR_ADSC_TWO_THETA: i64 = 55018;

/// Numeric labels of the motor fields, as seen by network clients.
pub mod label {
    pub const BUSY: i64 = 1001;
    pub const DESTINATION: i64 = 1002;
    pub const POSITION: i64 = 1003;
    pub const SET_POSITION: i64 = 1004;
    pub const BACKLASH_CORRECTION: i64 = 1013;
    pub const SOFT_ABORT: i64 = 1014;
    pub const IMMEDIATE_ABORT: i64 = 1015;
    pub const NEGATIVE_LIMIT_HIT: i64 = 1016;
    pub const POSITIVE_LIMIT_HIT: i64 = 1017;
    pub const RAW_HOME_COMMAND: i64 = 1018;
    pub const HOME_SEARCH: i64 = 1019;
    pub const HOME_SEARCH_TYPE: i64 = 1020;
    pub const CONSTANT_VELOCITY_MOVE: i64 = 1022;
    pub const SPEED: i64 = 1023;
    pub const BASE_SPEED: i64 = 1024;
    pub const MAXIMUM_SPEED: i64 = 1025;
    pub const ACCELERATION_TYPE: i64 = 1026;
    pub const RAW_ACCELERATION_PARAMETERS: i64 = 1027;
    pub const ACCELERATION_TIME: i64 = 1028;
    pub const ACCELERATION_DISTANCE: i64 = 1029;
    pub const SAVE_SPEED: i64 = 1031;
    pub const RESTORE_SPEED: i64 = 1032;
    pub const SYNCHRONOUS_MOTION_MODE: i64 = 1033;
    pub const GET_STATUS: i64 = 1038;
    pub const GET_EXTENDED_STATUS: i64 = 1039;
    pub const BUSY_START_INTERVAL: i64 = 1043;
    pub const VALUE_CHANGE_THRESHOLD: i64 = 3001;
    pub const AXIS_ENABLE: i64 = 4001;
    pub const CLOSED_LOOP: i64 = 4002;
    pub const FAULT_RESET: i64 = 4003;
}

/// How raw motor positions are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorSubclass {
    /// Integer step counts.
    Stepper,
    /// Floating point positions.
    Analog,
}

impl MotorSubclass {
    pub fn code(self) -> i64 {
        match self {
            MotorSubclass::Stepper => 501,
            MotorSubclass::Analog => 502,
        }
    }
}

bitflags! {
    /// Options for a single move command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveFlags: u32 {
        const NOWAIT = 0x2;
        const IGNORE_BACKLASH = 0x8;
        const GO_TO_BACKLASH_POSITION = 0x10;
        const ONLY_CHECK_LIMITS = 0x20;
        const SIMULTANEOUS_START = 0x80;
        const IGNORE_LIMIT_SWITCHES = 0x100;
    }
}

bitflags! {
    /// Static properties stored in the `motor_flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MotorFlags: u64 {
        const IS_PSEUDOMOTOR = 0x1;
    }
}

bitflags! {
    /// Motor status word, as reported by get-status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MotorStatus: u64 {
        const BUSY = 0x1;
        const POSITIVE_LIMIT_HIT = 0x2;
        const NEGATIVE_LIMIT_HIT = 0x4;
        const HOME_SEARCH_SUCCEEDED = 0x8;
        const FOLLOWING_ERROR = 0x10;
        const DRIVE_FAULT = 0x20;
        const AXIS_DISABLED = 0x40;
        const OPEN_LOOP = 0x80;
        const CONTROLLER_DISABLED = 0x100;
        const SOFT_POSITIVE_LIMIT_HIT = 0x200;
        const SOFT_NEGATIVE_LIMIT_HIT = 0x400;
        const SOFTWARE_ERROR = 0x800;
        const HARDWARE_ERROR = 0x1000;
        const COMMUNICATION_ERROR = 0x2000;
        const CONFIGURATION_ERROR = 0x4000;
        const AT_HOME_SWITCH = 0x8000;
        const ERROR = 0x8000_0000;
    }
}

/// Acceleration model in `acceleration_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccelerationType {
    None,
    Rate,
    Time,
}

impl AccelerationType {
    pub fn code(self) -> i64 {
        match self {
            AccelerationType::None => 0,
            AccelerationType::Rate => 1,
            AccelerationType::Time => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(AccelerationType::None),
            1 => Some(AccelerationType::Rate),
            2 => Some(AccelerationType::Time),
            _ => None,
        }
    }
}

/// Parameters reachable through get-parameter and set-parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorParameter {
    Speed,
    BaseSpeed,
    MaximumSpeed,
    AccelerationType,
    AccelerationTime,
    AccelerationDistance,
    SaveSpeed,
    RestoreSpeed,
    SynchronousMotionMode,
    BusyStartInterval,
    AxisEnable,
    ClosedLoop,
    FaultReset,
}

impl MotorParameter {
    pub const ALL: [MotorParameter; 13] = [
        MotorParameter::Speed,
        MotorParameter::BaseSpeed,
        MotorParameter::MaximumSpeed,
        MotorParameter::AccelerationType,
        MotorParameter::AccelerationTime,
        MotorParameter::AccelerationDistance,
        MotorParameter::SaveSpeed,
        MotorParameter::RestoreSpeed,
        MotorParameter::SynchronousMotionMode,
        MotorParameter::BusyStartInterval,
        MotorParameter::AxisEnable,
        MotorParameter::ClosedLoop,
        MotorParameter::FaultReset,
    ];

    /// Field label carrying this parameter.
    pub fn label(self) -> i64 {
        match self {
            MotorParameter::Speed => label::SPEED,
            MotorParameter::BaseSpeed => label::BASE_SPEED,
            MotorParameter::MaximumSpeed => label::MAXIMUM_SPEED,
            MotorParameter::AccelerationType => label::ACCELERATION_TYPE,
            MotorParameter::AccelerationTime => label::ACCELERATION_TIME,
            MotorParameter::AccelerationDistance => label::ACCELERATION_DISTANCE,
            MotorParameter::SaveSpeed => label::SAVE_SPEED,
            MotorParameter::RestoreSpeed => label::RESTORE_SPEED,
            MotorParameter::SynchronousMotionMode => label::SYNCHRONOUS_MOTION_MODE,
            MotorParameter::BusyStartInterval => label::BUSY_START_INTERVAL,
            MotorParameter::AxisEnable => label::AXIS_ENABLE,
            MotorParameter::ClosedLoop => label::CLOSED_LOOP,
            MotorParameter::FaultReset => label::FAULT_RESET,
        }
    }

    pub fn from_label(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.label() == value)
    }
}
