use crate::{ClockTick, FieldFlags, FieldType, FieldValue, Record, RecordHandle, Result};
use crate::{LABEL_LENGTH, RECORD_NAME_LENGTH};
use std::any::Any;
use std::fmt;

/// Which block of record storage a field lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageSlot {
    /// Identity fields shared by every record.
    Record,
    Superclass,
    Class,
    Type,
}

impl StorageSlot {
    pub const ALL: [StorageSlot; 4] = [
        StorageSlot::Record,
        StorageSlot::Superclass,
        StorageSlot::Class,
        StorageSlot::Type,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            StorageSlot::Record => 0,
            StorageSlot::Superclass => 1,
            StorageSlot::Class => 2,
            StorageSlot::Type => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageSlot::Record => "record",
            StorageSlot::Superclass => "superclass",
            StorageSlot::Class => "class",
            StorageSlot::Type => "type",
        }
    }
}

/// Length of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extent {
    Fixed(usize),
    /// Sized at run time through [`crate::RecordList::set_1d_field_array_length`].
    Variable,
    /// Element `array_index` of field `field_index` holds the extent (a varargs cookie).
    FromField { field_index: usize, array_index: usize },
}

impl Extent {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Extent::Fixed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimensions {
    Extents(Vec<Extent>),
    /// Rank comes from element 0 of `rank_field`, extent `k` from element `k` of `extent_field`.
    FromFields {
        rank_field: usize,
        extent_field: usize,
    },
}

impl Dimensions {
    pub fn scalar() -> Self {
        Dimensions::Extents(Vec::new())
    }

    pub fn is_fixed(&self) -> bool {
        match self {
            Dimensions::Extents(e) => e.iter().all(Extent::is_fixed),
            Dimensions::FromFields { .. } => false,
        }
    }

    /// Fields this shape depends on.
    pub fn cookie_fields(&self) -> Vec<usize> {
        match self {
            Dimensions::Extents(e) => e
                .iter()
                .filter_map(|x| match x {
                    Extent::FromField { field_index, .. } => Some(*field_index),
                    _ => None,
                })
                .collect(),
            Dimensions::FromFields {
                rank_field,
                extent_field,
            } => vec![*rank_field, *extent_field],
        }
    }

    /// Shape before any cookie is resolved: fixed extents as declared, the rest empty.
    pub fn initial_extents(&self) -> Vec<usize> {
        match self {
            Dimensions::Extents(e) => e
                .iter()
                .map(|x| match x {
                    Extent::Fixed(n) => *n,
                    _ => 0,
                })
                .collect(),
            Dimensions::FromFields { .. } => Vec::new(),
        }
    }
}

/// Predicate deciding whether a field changed since its last observed value.
pub type ValueChangedTest =
    fn(record: &Record, field_index: usize, last: Option<&FieldValue>) -> Result<bool>;

/// Immutable per-driver template for one field.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub label: Option<i64>,
    pub name: String,
    pub datatype: FieldType,
    pub dimensions: Dimensions,
    pub slot: StorageSlot,
    pub offset: usize,
    pub flags: FieldFlags,
    pub value_changed: Option<ValueChangedTest>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, datatype: FieldType, slot: StorageSlot, offset: usize) -> Self {
        Self {
            label: None,
            name: name.into(),
            datatype,
            dimensions: Dimensions::scalar(),
            slot,
            offset,
            flags: FieldFlags::empty(),
            value_changed: None,
        }
    }

    pub fn label(mut self, label: i64) -> Self {
        self.label = Some(label);
        self
    }

    pub fn flags(mut self, flags: FieldFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn extents(mut self, extents: Vec<Extent>) -> Self {
        self.dimensions = Dimensions::Extents(extents);
        self
    }

    pub fn fixed(self, extents: &[usize]) -> Self {
        self.extents(extents.iter().map(|n| Extent::Fixed(*n)).collect())
    }

    pub fn dimensions_from(mut self, rank_field: usize, extent_field: usize) -> Self {
        self.dimensions = Dimensions::FromFields {
            rank_field,
            extent_field,
        };
        self
    }

    pub fn value_changed(mut self, test: ValueChangedTest) -> Self {
        self.value_changed = Some(test);
        self
    }

    pub fn in_description(&self) -> bool {
        self.flags.contains(FieldFlags::IN_DESCRIPTION)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("label", &self.label)
            .field("name", &self.name)
            .field("datatype", &self.datatype)
            .field("dimensions", &self.dimensions)
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.label.map(|l| l.to_string()).unwrap_or_else(|| "-".into());
        write!(
            f,
            "{:<28} {:<12} {:>6}  {}[{}] flags=0x{:02x} dims={:?}",
            self.name,
            self.datatype.name(),
            label,
            self.slot.name(),
            self.offset,
            self.flags.bits(),
            self.dimensions
        )
    }
}

/// Offsets of the standard fields in the record slot. They double as field indexes.
pub mod rec {
    pub const NAME: usize = 0;
    pub const SUPERCLASS: usize = 1;
    pub const CLASS: usize = 2;
    pub const TYPE: usize = 3;
    pub const LABEL: usize = 4;
    pub const PRECISION: usize = 5;
    pub const RESYNCHRONIZE: usize = 6;
    pub const RECORD_FLAGS: usize = 7;
    pub const ALLOCATED_BY: usize = 8;
    pub const NUM_PARENT_RECORDS: usize = 9;
    pub const PARENT_RECORD_ARRAY: usize = 10;
    pub const NUM_CHILD_RECORDS: usize = 11;
    pub const CHILD_RECORD_ARRAY: usize = 12;

    /// Fields every description starts with.
    pub const IDENTITY_FIELDS: usize = 5;
    pub const SLOT_LEN: usize = 13;

    pub const LABEL_RESYNCHRONIZE: i64 = 101;
    pub const LABEL_RECORD_FLAGS: i64 = 102;
    pub const LABEL_PARENT_RECORD_ARRAY: i64 = 103;
    pub const LABEL_CHILD_RECORD_ARRAY: i64 = 104;
}

/// The fields that open every driver's table, in the required order.
pub fn record_standard_fields() -> Vec<FieldDescriptor> {
    use FieldFlags as F;
    use StorageSlot::Record as R;
    let fixed = F::NO_TIMESTAMP;
    vec![
        FieldDescriptor::new("name", FieldType::String, R, rec::NAME)
            .fixed(&[RECORD_NAME_LENGTH])
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::READ_ONLY | fixed),
        FieldDescriptor::new("superclass", FieldType::RecordType, R, rec::SUPERCLASS)
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::READ_ONLY | fixed),
        FieldDescriptor::new("class", FieldType::RecordType, R, rec::CLASS)
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::READ_ONLY | fixed),
        FieldDescriptor::new("type", FieldType::RecordType, R, rec::TYPE)
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::READ_ONLY | fixed),
        FieldDescriptor::new("label", FieldType::String, R, rec::LABEL)
            .fixed(&[LABEL_LENGTH])
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | fixed),
        FieldDescriptor::new("precision", FieldType::Long, R, rec::PRECISION).flags(fixed),
        FieldDescriptor::new("resynchronize", FieldType::Bool, R, rec::RESYNCHRONIZE)
            .label(rec::LABEL_RESYNCHRONIZE),
        FieldDescriptor::new("record_flags", FieldType::Hex, R, rec::RECORD_FLAGS)
            .label(rec::LABEL_RECORD_FLAGS)
            .flags(F::READ_ONLY | fixed),
        FieldDescriptor::new("allocated_by", FieldType::Record, R, rec::ALLOCATED_BY)
            .flags(F::READ_ONLY | F::NO_PARENT_DEPENDENCY | fixed),
        FieldDescriptor::new("num_parent_records", FieldType::Long, R, rec::NUM_PARENT_RECORDS)
            .flags(F::READ_ONLY | fixed),
        FieldDescriptor::new("parent_record_array", FieldType::Record, R, rec::PARENT_RECORD_ARRAY)
            .label(rec::LABEL_PARENT_RECORD_ARRAY)
            .extents(vec![Extent::Variable])
            .flags(F::READ_ONLY | F::VARIABLE_LENGTH | F::NO_PARENT_DEPENDENCY | fixed),
        FieldDescriptor::new("num_child_records", FieldType::Long, R, rec::NUM_CHILD_RECORDS)
            .flags(F::READ_ONLY | fixed),
        FieldDescriptor::new("child_record_array", FieldType::Record, R, rec::CHILD_RECORD_ARRAY)
            .label(rec::LABEL_CHILD_RECORD_ARRAY)
            .extents(vec![Extent::Variable])
            .flags(F::READ_ONLY | F::VARIABLE_LENGTH | F::NO_PARENT_DEPENDENCY | fixed),
    ]
}

/// Index of the field called `name` in a descriptor table.
pub fn position(fields: &[FieldDescriptor], name: &str) -> Option<usize> {
    fields.iter().position(|f| f.name == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: ClockTick,
    pub next_due: ClockTick,
}

/// Per-record live binding of one descriptor.
pub struct FieldInstance {
    pub(crate) record: RecordHandle,
    pub(crate) index: usize,
    pub(crate) slot: StorageSlot,
    pub(crate) offset: usize,
    pub(crate) resolved: bool,
    pub(crate) active: bool,
    pub(crate) value_changed: Option<ValueChangedTest>,
    pub(crate) last_value: Option<FieldValue>,
    pub(crate) poll: Option<PollSchedule>,
    pub(crate) application_data: Option<Box<dyn Any + Send>>,
}

impl FieldInstance {
    pub(crate) fn new(record: RecordHandle, index: usize, descriptor: &FieldDescriptor) -> Self {
        Self {
            record,
            index,
            slot: descriptor.slot,
            offset: descriptor.offset,
            resolved: descriptor.dimensions.cookie_fields().is_empty(),
            active: false,
            value_changed: descriptor.value_changed,
            last_value: None,
            poll: None,
            application_data: None,
        }
    }

    pub fn record(&self) -> RecordHandle {
        self.record
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn slot(&self) -> StorageSlot {
        self.slot
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True once every cookie in the field's shape has been replaced by a concrete extent.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn last_value(&self) -> Option<&FieldValue> {
        self.last_value.as_ref()
    }

    pub fn poll(&self) -> Option<PollSchedule> {
        self.poll
    }

    pub fn set_value_changed_test(&mut self, test: Option<ValueChangedTest>) {
        self.value_changed = test;
    }

    pub fn application_data<T: Any>(&self) -> Option<&T> {
        self.application_data.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn set_application_data<T: Any + Send>(&mut self, data: T) {
        self.application_data = Some(Box::new(data));
    }

    pub fn take_application_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.application_data.take()
    }
}

impl fmt::Debug for FieldInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldInstance")
            .field("record", &self.record)
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("resolved", &self.resolved)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_fields_layout() {
        let fields = record_standard_fields();
        assert_eq!(fields.len(), rec::SLOT_LEN);
        for (i, f) in fields.iter().enumerate() {
            assert_eq!(f.offset, i, "{} out of place", f.name);
            assert_eq!(f.slot, StorageSlot::Record);
        }
        let identity: Vec<&str> = fields[..rec::IDENTITY_FIELDS]
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(identity, ["name", "superclass", "class", "type", "label"]);
        assert!(fields[..rec::IDENTITY_FIELDS].iter().all(|f| f.in_description()));
    }

    #[test]
    fn test_dimensions_helpers() {
        let d = Dimensions::Extents(vec![
            Extent::Fixed(3),
            Extent::FromField {
                field_index: 14,
                array_index: 1,
            },
        ]);
        assert!(!d.is_fixed());
        assert_eq!(d.cookie_fields(), vec![14]);
        assert_eq!(d.initial_extents(), vec![3, 0]);

        let v = Dimensions::FromFields {
            rank_field: 13,
            extent_field: 14,
        };
        assert!(v.initial_extents().is_empty());
        assert_eq!(v.cookie_fields(), vec![13, 14]);
    }

    #[test]
    fn test_position_lookup() {
        let fields = record_standard_fields();
        assert_eq!(position(&fields, "label"), Some(rec::LABEL));
        assert_eq!(position(&fields, "nope"), None);
    }
}
