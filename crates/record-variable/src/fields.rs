use record_runtime::{record_standard_fields, Extent, FieldDescriptor, FieldFlags, FieldType, StorageSlot};

/// Field indexes shared by every variable driver.
pub mod var {
    pub const NUM_DIMENSIONS: usize = 13;
    pub const DIMENSION: usize = 14;
    pub const VALUE: usize = 15;

    pub const LABEL_VALUE: i64 = 1001;
}

/// Field table of a variable holding `datatype` values.
///
/// `num_dimensions` gives the rank of `value` and `dimension` its extents; for
/// strings the last extent is the maximum string length.
pub fn variable_fields(datatype: FieldType) -> Vec<FieldDescriptor> {
    use FieldFlags as F;
    let mut fields = record_standard_fields();
    fields.extend([
        FieldDescriptor::new("num_dimensions", FieldType::Long, StorageSlot::Superclass, 0)
            .flags(F::IN_DESCRIPTION),
        FieldDescriptor::new("dimension", FieldType::Long, StorageSlot::Superclass, 1)
            .extents(vec![Extent::FromField {
                field_index: var::NUM_DIMENSIONS,
                array_index: 0,
            }])
            .flags(F::IN_DESCRIPTION | F::VARIABLE_LENGTH),
        FieldDescriptor::new("value", datatype, StorageSlot::Superclass, 2)
            .label(var::LABEL_VALUE)
            .dimensions_from(var::NUM_DIMENSIONS, var::DIMENSION)
            .flags(F::IN_DESCRIPTION | F::IN_SUMMARY | F::VARIABLE_LENGTH),
    ]);
    fields
}
