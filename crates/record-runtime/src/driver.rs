use crate::field::{rec, record_standard_fields, Dimensions, Extent, FieldDescriptor, StorageSlot};
use crate::{ids, FieldFlags, FieldType, RecordHandle, RecordList, Result, RuntimeError, TypeTriple};
use crate::{DRIVER_NAME_LENGTH, FIELD_NAME_LENGTH, MAX_DIMENSIONS};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Operations every record type provides. Lifecycle hooks default to no-ops.
pub trait RecordDriver: Send + Sync {
    /// Called once at registration, before the table is validated.
    fn initialize_driver(&self, _entry: &mut DriverEntry) -> Result<()> {
        Ok(())
    }

    /// Allocate driver state for a freshly allocated record.
    fn create_record_structures(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }

    fn finish_record_initialization(
        &self,
        _list: &mut RecordList,
        _record: RecordHandle,
    ) -> Result<()> {
        Ok(())
    }

    fn delete_record(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }

    /// Driver-specific report. The default defers to the generic field dump.
    fn print_structure(
        &self,
        _list: &RecordList,
        _record: RecordHandle,
        _out: &mut dyn fmt::Write,
    ) -> Result<()> {
        Err(RuntimeError::unsupported("print_structure"))
    }

    fn open(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }

    fn close(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }

    fn finish_delayed_initialization(
        &self,
        _list: &mut RecordList,
        _record: RecordHandle,
    ) -> Result<()> {
        Ok(())
    }

    fn resynchronize(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Err(RuntimeError::unsupported("resynchronize"))
    }

    fn special_processing_setup(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }
}

/// A driver that only needs the default lifecycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainRecordDriver;

impl RecordDriver for PlainRecordDriver {}

/// Sizes of the driver-owned storage slots. The record slot is fixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotSizes {
    pub superclass: usize,
    pub class: usize,
    pub type_: usize,
}

impl SlotSizes {
    pub fn get(&self, slot: StorageSlot) -> usize {
        match slot {
            StorageSlot::Record => rec::SLOT_LEN,
            StorageSlot::Superclass => self.superclass,
            StorageSlot::Class => self.class,
            StorageSlot::Type => self.type_,
        }
    }
}

/// Registration record pairing a field template with operation tables.
#[derive(Clone)]
pub struct DriverEntry {
    pub name: String,
    pub triple: TypeTriple,
    pub record_functions: Arc<dyn RecordDriver>,
    pub superclass_functions: Option<Arc<dyn Any + Send + Sync>>,
    pub class_functions: Option<Arc<dyn Any + Send + Sync>>,
    pub fields: Arc<[FieldDescriptor]>,
    pub slot_sizes: SlotSizes,
}

impl DriverEntry {
    pub fn new(
        name: impl Into<String>,
        triple: TypeTriple,
        record_functions: Arc<dyn RecordDriver>,
        fields: Vec<FieldDescriptor>,
    ) -> Self {
        let slot_sizes = infer_slot_sizes(&fields);
        Self {
            name: name.into(),
            triple,
            record_functions,
            superclass_functions: None,
            class_functions: None,
            fields: fields.into(),
            slot_sizes,
        }
    }

    pub fn with_superclass_functions(mut self, functions: Arc<dyn Any + Send + Sync>) -> Self {
        self.superclass_functions = Some(functions);
        self
    }

    pub fn with_class_functions(mut self, functions: Arc<dyn Any + Send + Sync>) -> Self {
        self.class_functions = Some(functions);
        self
    }

    /// Overrides the slot sizes inferred from the field offsets.
    pub fn with_slot_sizes(mut self, sizes: SlotSizes) -> Self {
        self.slot_sizes = sizes;
        self
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn superclass_functions_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.superclass_functions.clone()?.downcast::<T>().ok()
    }

    pub fn class_functions_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.class_functions.clone()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for DriverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverEntry")
            .field("name", &self.name)
            .field("triple", &self.triple)
            .field("num_fields", &self.fields.len())
            .field("slot_sizes", &self.slot_sizes)
            .finish_non_exhaustive()
    }
}

fn infer_slot_sizes(fields: &[FieldDescriptor]) -> SlotSizes {
    let size = |slot: StorageSlot| {
        fields
            .iter()
            .filter(|f| f.slot == slot)
            .map(|f| f.offset + 1)
            .max()
            .unwrap_or(0)
    };
    SlotSizes {
        superclass: size(StorageSlot::Superclass),
        class: size(StorageSlot::Class),
        type_: size(StorageSlot::Type),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClassName {
    name: String,
    superclass: i64,
    id: i64,
}

/// Table of every known record type.
///
/// Populated once at startup, then shared read-only (typically as `Arc<DriverRegistry>`).
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    superclasses: Vec<(String, i64)>,
    classes: Vec<ClassName>,
    drivers: Vec<Arc<DriverEntry>>,
    by_triple: HashMap<TypeTriple, usize>,
    by_name: HashMap<String, usize>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// A registry that knows the standard superclasses but no drivers.
    pub fn new() -> Self {
        let superclasses = [
            ("list_head", ids::SUPERCLASS_LIST_HEAD),
            ("interface", ids::SUPERCLASS_INTERFACE),
            ("device", ids::SUPERCLASS_DEVICE),
            ("scan", ids::SUPERCLASS_SCAN),
            ("variable", ids::SUPERCLASS_VARIABLE),
            ("server", ids::SUPERCLASS_SERVER),
            ("operation", ids::SUPERCLASS_OPERATION),
            ("placeholder", ids::SUPERCLASS_PLACEHOLDER),
        ]
        .into_iter()
        .map(|(n, id)| (n.to_string(), id))
        .collect();
        Self {
            superclasses,
            classes: Vec::new(),
            drivers: Vec::new(),
            by_triple: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register_class(&mut self, name: &str, superclass: i64, id: i64) -> Result<()> {
        if self.superclass_name(superclass).is_none() {
            return Err(RuntimeError::NotFound(format!(
                "superclass {superclass} for class '{name}'"
            )));
        }
        if let Some(existing) = self.classes.iter().find(|c| c.id == id || c.name == name) {
            if existing.name == name && existing.id == id && existing.superclass == superclass {
                return Ok(());
            }
            return Err(RuntimeError::AlreadyExists(format!(
                "class '{}' ({}) conflicts with '{name}' ({id})",
                existing.name, existing.id
            )));
        }
        self.classes.push(ClassName {
            name: name.to_string(),
            superclass,
            id,
        });
        Ok(())
    }

    /// Appends a table of drivers.
    ///
    /// Each entry is initialized and validated first; if any entry fails, or any triple
    /// or name is already known, nothing from the table is added.
    pub fn register(&mut self, table: Vec<DriverEntry>) -> Result<()> {
        let mut staged = Vec::with_capacity(table.len());
        let mut triples = HashSet::new();
        let mut names = HashSet::new();
        for mut entry in table {
            let functions = Arc::clone(&entry.record_functions);
            functions.initialize_driver(&mut entry)?;
            validate(&entry)?;
            if self.by_triple.contains_key(&entry.triple) || !triples.insert(entry.triple) {
                return Err(RuntimeError::DuplicateType(format!(
                    "driver '{}' reuses type {}",
                    entry.name, entry.triple
                )));
            }
            if self.by_name.contains_key(&entry.name) || !names.insert(entry.name.clone()) {
                return Err(RuntimeError::AlreadyExists(format!(
                    "driver name '{}'",
                    entry.name
                )));
            }
            if self.superclass_name(entry.triple.superclass).is_none() {
                return Err(RuntimeError::ConfigurationError(format!(
                    "driver '{}' names unknown superclass {}",
                    entry.name, entry.triple.superclass
                )));
            }
            if self.class_name(entry.triple.class).is_none() {
                return Err(RuntimeError::ConfigurationError(format!(
                    "driver '{}' names unknown class {}",
                    entry.name, entry.triple.class
                )));
            }
            staged.push(entry);
        }
        for entry in staged {
            let index = self.drivers.len();
            tracing::debug!(driver = %entry.name, triple = %entry.triple, "registered driver");
            self.by_triple.insert(entry.triple, index);
            self.by_name.insert(entry.name.clone(), index);
            self.drivers.push(Arc::new(entry));
        }
        Ok(())
    }

    pub fn lookup_by_type(&self, superclass: i64, class: i64, type_id: i64) -> Option<&Arc<DriverEntry>> {
        let triple = TypeTriple::new(superclass, class, type_id);
        self.by_triple.get(&triple).and_then(|&i| self.drivers.get(i))
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&Arc<DriverEntry>> {
        self.by_name.get(name).and_then(|&i| self.drivers.get(i))
    }

    /// Driver entry whose type id alone is `type_id`.
    pub fn lookup_by_type_id(&self, type_id: i64) -> Option<&Arc<DriverEntry>> {
        self.drivers.iter().find(|d| d.triple.type_id == type_id)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Arc<DriverEntry>> {
        self.drivers.iter()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn superclass_name(&self, id: i64) -> Option<&str> {
        self.superclasses
            .iter()
            .find(|(_, i)| *i == id)
            .map(|(n, _)| n.as_str())
    }

    pub fn superclass_id(&self, name: &str) -> Option<i64> {
        self.superclasses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, i)| *i)
    }

    pub fn class_name(&self, id: i64) -> Option<&str> {
        self.classes
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }

    pub fn class_id(&self, name: &str) -> Option<i64> {
        self.classes.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Re-validates every registered table.
    pub fn validate_all(&self) -> Result<()> {
        for entry in &self.drivers {
            validate(entry)?;
        }
        Ok(())
    }
}

fn config_error(entry: &DriverEntry, msg: String) -> RuntimeError {
    RuntimeError::ConfigurationError(format!("driver '{}': {msg}", entry.name))
}

/// Checks a driver's field table for internal consistency.
pub fn validate(entry: &DriverEntry) -> Result<()> {
    if entry.name.is_empty() || entry.name.len() > DRIVER_NAME_LENGTH {
        return Err(config_error(entry, "driver name length out of range".into()));
    }
    let fields = &entry.fields;

    let standard = record_standard_fields();
    if fields.len() < standard.len() {
        return Err(config_error(entry, "standard record fields missing".into()));
    }
    for (expected, actual) in standard.iter().zip(fields.iter()) {
        if expected.name != actual.name
            || expected.datatype != actual.datatype
            || expected.slot != actual.slot
            || expected.offset != actual.offset
        {
            return Err(config_error(
                entry,
                format!(
                    "standard field '{}' missing or reordered (found '{}')",
                    expected.name, actual.name
                ),
            ));
        }
    }

    let mut names = HashSet::new();
    let mut locations: HashMap<(StorageSlot, usize), usize> = HashMap::new();
    for (i, field) in fields.iter().enumerate() {
        if field.name.is_empty() || field.name.len() > FIELD_NAME_LENGTH {
            return Err(config_error(entry, format!("field {i} has an invalid name")));
        }
        if !names.insert(field.name.as_str()) {
            return Err(config_error(entry, format!("duplicate field name '{}'", field.name)));
        }
        if field.offset >= entry.slot_sizes.get(field.slot) {
            return Err(config_error(
                entry,
                format!(
                    "field '{}' offset {} out of range for the {} slot",
                    field.name,
                    field.offset,
                    field.slot.name()
                ),
            ));
        }
        if let Some(&first) = locations.get(&(field.slot, field.offset)) {
            let other = &fields[first];
            if other.datatype != field.datatype || other.dimensions != field.dimensions {
                return Err(config_error(
                    entry,
                    format!("fields '{}' and '{}' share storage but differ in type", other.name, field.name),
                ));
            }
        } else {
            locations.insert((field.slot, field.offset), i);
        }
        validate_dimensions(entry, i, field)?;
    }

    for slot in [StorageSlot::Superclass, StorageSlot::Class, StorageSlot::Type] {
        for offset in 0..entry.slot_sizes.get(slot) {
            if !locations.contains_key(&(slot, offset)) {
                return Err(config_error(
                    entry,
                    format!("{} slot offset {offset} has no field", slot.name()),
                ));
            }
        }
    }
    Ok(())
}

fn validate_dimensions(entry: &DriverEntry, index: usize, field: &FieldDescriptor) -> Result<()> {
    let fields = &entry.fields;
    let variable = field.flags.contains(FieldFlags::VARIABLE_LENGTH);
    let check_cookie = |target: usize, array_index: usize| -> Result<()> {
        if target == index {
            return Err(config_error(
                entry,
                format!("field '{}' sizes itself", field.name),
            ));
        }
        let Some(source) = fields.get(target) else {
            return Err(config_error(
                entry,
                format!("field '{}' refers to missing field {target}", field.name),
            ));
        };
        if !source.datatype.is_integer() {
            return Err(config_error(
                entry,
                format!("field '{}' is sized by non-integer field '{}'", field.name, source.name),
            ));
        }
        if let Dimensions::Extents(extents) = &source.dimensions {
            match extents.as_slice() {
                [] if array_index == 0 => {}
                [Extent::Fixed(n)] if array_index < *n => {}
                [e] if !e.is_fixed() => {}
                _ => {
                    return Err(config_error(
                        entry,
                        format!(
                            "field '{}' uses element {array_index} of '{}', which it does not have",
                            field.name, source.name
                        ),
                    ))
                }
            }
        }
        Ok(())
    };

    match &field.dimensions {
        Dimensions::Extents(extents) => {
            if extents.len() > MAX_DIMENSIONS {
                return Err(config_error(
                    entry,
                    format!("field '{}' has more than {MAX_DIMENSIONS} dimensions", field.name),
                ));
            }
            if field.datatype == FieldType::String && extents.is_empty() {
                return Err(config_error(
                    entry,
                    format!("string field '{}' has no length dimension", field.name),
                ));
            }
            let has_variable = extents.iter().any(|e| !e.is_fixed());
            if variable && !has_variable {
                return Err(config_error(
                    entry,
                    format!("variable-length field '{}' only declares fixed extents", field.name),
                ));
            }
            if !variable && has_variable {
                return Err(config_error(
                    entry,
                    format!("field '{}' has variable extents but no variable-length flag", field.name),
                ));
            }
            for extent in extents {
                if let Extent::FromField {
                    field_index,
                    array_index,
                } = extent
                {
                    check_cookie(*field_index, *array_index)?;
                }
            }
        }
        Dimensions::FromFields {
            rank_field,
            extent_field,
        } => {
            if !variable {
                return Err(config_error(
                    entry,
                    format!("field '{}' takes its rank from a field but is not variable-length", field.name),
                ));
            }
            check_cookie(*rank_field, 0)?;
            check_cookie(*extent_field, 0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const TEST_CLASS: i64 = 900;

    fn entry(name: &str, type_id: i64, extra: Vec<FieldDescriptor>) -> DriverEntry {
        let mut fields = record_standard_fields();
        fields.extend(extra);
        DriverEntry::new(
            name,
            TypeTriple::new(ids::SUPERCLASS_DEVICE, TEST_CLASS, type_id),
            Arc::new(PlainRecordDriver),
            fields,
        )
    }

    fn registry() -> DriverRegistry {
        let mut reg = DriverRegistry::new();
        reg.register_class("test_class", ids::SUPERCLASS_DEVICE, TEST_CLASS)
            .unwrap();
        reg
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = registry();
        reg.register(vec![entry("alpha", 1, vec![]), entry("beta", 2, vec![])])
            .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(
            reg.lookup_by_type(ids::SUPERCLASS_DEVICE, TEST_CLASS, 2)
                .unwrap()
                .name,
            "beta"
        );
        assert_eq!(reg.lookup_by_name("alpha").unwrap().triple.type_id, 1);
        assert!(reg.lookup_by_name("gamma").is_none());
        assert_eq!(reg.class_id("test_class"), Some(TEST_CLASS));
        assert_eq!(reg.superclass_name(ids::SUPERCLASS_VARIABLE), Some("variable"));
    }

    #[test]
    fn test_duplicate_triple_rejected_first_kept() {
        let mut reg = registry();
        reg.register(vec![entry("alpha", 1, vec![])]).unwrap();
        let err = reg.register(vec![entry("other", 1, vec![])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateType);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup_by_type_id(1).unwrap().name, "alpha");
        assert!(reg.lookup_by_name("other").is_none());
    }

    #[test]
    fn test_failed_table_adds_nothing() {
        let mut reg = registry();
        let bad = entry(
            "bad",
            3,
            vec![FieldDescriptor::new("label", FieldType::Long, StorageSlot::Type, 0)],
        );
        let err = reg.register(vec![entry("good", 2, vec![]), bad]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_validate_rejects_reordered_identity() {
        let mut fields = record_standard_fields();
        fields.swap(rec::CLASS, rec::TYPE);
        let e = DriverEntry::new(
            "swapped",
            TypeTriple::new(ids::SUPERCLASS_DEVICE, TEST_CLASS, 9),
            Arc::new(PlainRecordDriver),
            fields,
        );
        assert_eq!(validate(&e).unwrap_err().kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_validate_rejects_offset_out_of_range() {
        let e = entry(
            "offset",
            4,
            vec![FieldDescriptor::new("gain", FieldType::Double, StorageSlot::Type, 0)],
        )
        .with_slot_sizes(SlotSizes::default());
        assert_eq!(validate(&e).unwrap_err().kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_validate_rejects_fixed_variable_field() {
        let e = entry(
            "fixedvar",
            5,
            vec![FieldDescriptor::new("data", FieldType::Long, StorageSlot::Type, 0)
                .fixed(&[4])
                .flags(FieldFlags::VARIABLE_LENGTH)],
        );
        assert!(validate(&e).is_err());

        let e = entry(
            "unflagged",
            6,
            vec![FieldDescriptor::new("data", FieldType::Long, StorageSlot::Type, 0)
                .extents(vec![Extent::Variable])],
        );
        assert!(validate(&e).is_err());
    }

    #[test]
    fn test_validate_cookie_targets() {
        let n = rec::SLOT_LEN;
        let good = entry(
            "cookie",
            7,
            vec![
                FieldDescriptor::new("count", FieldType::Long, StorageSlot::Type, 0),
                FieldDescriptor::new("data", FieldType::Double, StorageSlot::Type, 1)
                    .extents(vec![Extent::FromField {
                        field_index: n,
                        array_index: 0,
                    }])
                    .flags(FieldFlags::VARIABLE_LENGTH),
            ],
        );
        validate(&good).unwrap();

        let selfref = entry(
            "selfref",
            8,
            vec![FieldDescriptor::new("data", FieldType::Long, StorageSlot::Type, 0)
                .extents(vec![Extent::FromField {
                    field_index: n,
                    array_index: 0,
                }])
                .flags(FieldFlags::VARIABLE_LENGTH)],
        );
        assert!(validate(&selfref).is_err());

        let not_integer = entry(
            "notint",
            9,
            vec![
                FieldDescriptor::new("count", FieldType::Double, StorageSlot::Type, 0),
                FieldDescriptor::new("data", FieldType::Long, StorageSlot::Type, 1)
                    .extents(vec![Extent::FromField {
                        field_index: n,
                        array_index: 0,
                    }])
                    .flags(FieldFlags::VARIABLE_LENGTH),
            ],
        );
        assert!(validate(&not_integer).is_err());
    }

    #[test]
    fn test_validate_aliases_and_gaps() {
        let alias = entry(
            "alias",
            10,
            vec![
                FieldDescriptor::new("soft_abort", FieldType::Bool, StorageSlot::Type, 0),
                FieldDescriptor::new("stop", FieldType::Bool, StorageSlot::Type, 0),
            ],
        );
        validate(&alias).unwrap();

        let clash = entry(
            "clash",
            11,
            vec![
                FieldDescriptor::new("soft_abort", FieldType::Bool, StorageSlot::Type, 0),
                FieldDescriptor::new("stop", FieldType::Long, StorageSlot::Type, 0),
            ],
        );
        assert!(validate(&clash).is_err());

        let gap = entry(
            "gap",
            12,
            vec![FieldDescriptor::new("x", FieldType::Long, StorageSlot::Type, 1)],
        );
        assert!(validate(&gap).is_err());
    }

    #[test]
    fn test_duplicate_field_names() {
        let e = entry(
            "dupe",
            13,
            vec![
                FieldDescriptor::new("x", FieldType::Long, StorageSlot::Type, 0),
                FieldDescriptor::new("x", FieldType::Long, StorageSlot::Type, 1),
            ],
        );
        assert!(validate(&e).is_err());
    }

    #[test]
    fn test_concurrent_lookups() {
        let mut reg = registry();
        reg.register((1..=8).map(|i| entry(&format!("drv{i}"), i, vec![])).collect())
            .unwrap();
        let reg = Arc::new(reg);
        std::thread::scope(|s| {
            for i in 1..=8i64 {
                let reg = Arc::clone(&reg);
                s.spawn(move || {
                    let by_type = reg
                        .lookup_by_type(ids::SUPERCLASS_DEVICE, TEST_CLASS, i)
                        .unwrap();
                    let by_name = reg.lookup_by_name(&format!("drv{i}")).unwrap();
                    assert!(Arc::ptr_eq(by_type, by_name));
                });
            }
        });
    }
}
