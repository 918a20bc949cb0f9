use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Maximum number of array dimensions a field may declare.
pub const MAX_DIMENSIONS: usize = 8;
pub const RECORD_NAME_LENGTH: usize = 40;
pub const FIELD_NAME_LENGTH: usize = 40;
pub const LABEL_LENGTH: usize = 40;
pub const UNITS_NAME_LENGTH: usize = 16;
pub const DRIVER_NAME_LENGTH: usize = 32;
pub const INTERFACE_ADDRESS_NAME_LENGTH: usize = 40;
pub const RECORD_DESCRIPTION_LENGTH: usize = 2500;

/// Numeric superclass and class identifiers shared by all drivers.
pub mod ids {
    pub const SUPERCLASS_LIST_HEAD: i64 = 1;
    pub const SUPERCLASS_INTERFACE: i64 = 2;
    pub const SUPERCLASS_DEVICE: i64 = 3;
    pub const SUPERCLASS_SCAN: i64 = 4;
    pub const SUPERCLASS_VARIABLE: i64 = 5;
    pub const SUPERCLASS_SERVER: i64 = 6;
    pub const SUPERCLASS_OPERATION: i64 = 7;
    pub const SUPERCLASS_PLACEHOLDER: i64 = 32768;

    pub const CLASS_MOTOR: i64 = 25;
    pub const CLASS_INLINE_VARIABLE: i64 = 61;
}

/// Datatype tag of a field. Codes match the numeric values used in saved descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Char,
    UChar,
    Short,
    UShort,
    Bool,
    Long,
    ULong,
    Float,
    Double,
    Hex,
    Int64,
    UInt64,
    Record,
    RecordType,
    Interface,
    RecordField,
}

impl FieldType {
    pub const ALL: [FieldType; 17] = [
        FieldType::String,
        FieldType::Char,
        FieldType::UChar,
        FieldType::Short,
        FieldType::UShort,
        FieldType::Bool,
        FieldType::Long,
        FieldType::ULong,
        FieldType::Float,
        FieldType::Double,
        FieldType::Hex,
        FieldType::Int64,
        FieldType::UInt64,
        FieldType::Record,
        FieldType::RecordType,
        FieldType::Interface,
        FieldType::RecordField,
    ];

    pub fn code(self) -> i64 {
        match self {
            FieldType::String => 1,
            FieldType::Char => 2,
            FieldType::UChar => 3,
            FieldType::Short => 4,
            FieldType::UShort => 5,
            FieldType::Bool => 6,
            FieldType::Long => 8,
            FieldType::ULong => 9,
            FieldType::Float => 10,
            FieldType::Double => 11,
            FieldType::Hex => 12,
            FieldType::Int64 => 14,
            FieldType::UInt64 => 15,
            FieldType::Record => 31,
            FieldType::RecordType => 32,
            FieldType::Interface => 33,
            FieldType::RecordField => 34,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Char => "char",
            FieldType::UChar => "uchar",
            FieldType::Short => "short",
            FieldType::UShort => "ushort",
            FieldType::Bool => "bool",
            FieldType::Long => "long",
            FieldType::ULong => "ulong",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Hex => "hex",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Record => "record",
            FieldType::RecordType => "recordtype",
            FieldType::Interface => "interface",
            FieldType::RecordField => "record_field",
        }
    }

    /// Datatypes whose values point at other records.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            FieldType::Record | FieldType::Interface | FieldType::RecordField
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Char
                | FieldType::UChar
                | FieldType::Short
                | FieldType::UShort
                | FieldType::Long
                | FieldType::ULong
                | FieldType::Hex
                | FieldType::Int64
                | FieldType::UInt64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, FieldType::Float | FieldType::Double)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Behaviour flags attached to a field descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u32 {
        const IN_DESCRIPTION = 0x1;
        const IN_SUMMARY = 0x2;
        const READ_ONLY = 0x4;
        const NO_ACCESS = 0x8;
        const VARIABLE_LENGTH = 0x10;
        const NO_TIMESTAMP = 0x20;
        const POLL = 0x40;
        const NO_PARENT_DEPENDENCY = 0x80;
    }
}

bitflags! {
    /// Status bits stored in a record's `record_flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordFlags: u64 {
        const INITIALIZED = 0x1;
        const ENABLED = 0x2;
        const OPEN = 0x4;
        const BROKEN = 0x8;
        const FAULTED = 0x10;
    }
}

bitflags! {
    /// Options for record creation and placeholder fixup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CreationFlags: u32 {
        const ALLOW_RECORD_REPLACEMENT = 0x1;
        const DELETE_BROKEN_RECORDS = 0x4;
    }
}

bitflags! {
    /// Options for opening every record of a list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InitHardwareFlags: u32 {
        const TRACE_OPENS = 0x1;
        const ABORT_ON_FAULT = 0x2;
    }
}

/// Numeric identity of a driver: (superclass, class, type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTriple {
    pub superclass: i64,
    pub class: i64,
    pub type_id: i64,
}

impl TypeTriple {
    pub const fn new(superclass: i64, class: i64, type_id: i64) -> Self {
        Self {
            superclass,
            class,
            type_id,
        }
    }
}

impl fmt::Display for TypeTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.superclass, self.class, self.type_id)
    }
}

/// Stable handle to a record in a [`crate::RecordList`] arena.
///
/// The generation guards against a handle outliving the record it named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl RecordHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Value of an interface-typed field: a record plus a device address on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceRef {
    pub record: RecordHandle,
    pub address_name: String,
}

/// Value of a record-field-typed field: a record plus one of its field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub record: RecordHandle,
    pub field_name: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(OffsetDateTime::now_utc())
    }

    pub fn to_rfc3339(&self) -> Option<String> {
        self.0
            .format(&time::format_description::well_known::Rfc3339)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_codes_roundtrip() {
        for ty in FieldType::ALL {
            assert_eq!(FieldType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(FieldType::from_code(7), None);
        assert_eq!(FieldType::Hex.code(), 12);
    }

    #[test]
    fn test_reference_types() {
        assert!(FieldType::Record.is_reference());
        assert!(FieldType::Interface.is_reference());
        assert!(!FieldType::RecordType.is_reference());
        assert!(FieldType::Hex.is_integer());
        assert!(!FieldType::Bool.is_numeric());
    }

    #[test]
    fn test_flag_bits() {
        let f = FieldFlags::IN_DESCRIPTION | FieldFlags::READ_ONLY;
        assert_eq!(f.bits(), 0x5);
        assert!(f.contains(FieldFlags::READ_ONLY));
        assert!(!f.contains(FieldFlags::POLL));
    }
}
