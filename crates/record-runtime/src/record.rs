use crate::field::{rec, FieldDescriptor, FieldInstance, StorageSlot};
use crate::{
    DriverEntry, FieldFlags, FieldScalar, FieldType, FieldValue, RecordFlags, RecordHandle, Result,
    RuntimeError, Scalar, Timestamp, TypeTriple,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Lifecycle position of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    Unconstructed,
    StructuresCreated,
    Initialized,
    Open,
    Closed,
    Deleted,
}

/// One side of a dependency: the other record and the referencing field on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub record: RecordHandle,
    pub field: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Storage {
    slots: [Vec<FieldValue>; 4],
}

impl Storage {
    fn get(&self, slot: StorageSlot, offset: usize) -> Option<&FieldValue> {
        self.slots[slot.index()].get(offset)
    }

    fn get_mut(&mut self, slot: StorageSlot, offset: usize) -> Option<&mut FieldValue> {
        self.slots[slot.index()].get_mut(offset)
    }
}

/// Initial storage shape for a descriptor, before cookies are resolved.
pub(crate) fn initial_value(descriptor: &FieldDescriptor) -> Result<FieldValue> {
    let mut extents = descriptor.dimensions.initial_extents();
    if descriptor.datatype == FieldType::String && extents.is_empty() {
        extents.push(0);
    }
    FieldValue::new(descriptor.datatype, extents)
}

/// An addressable instance of a driver type.
pub struct Record {
    pub(crate) handle: RecordHandle,
    pub(crate) driver: Arc<DriverEntry>,
    pub(crate) fields: Vec<FieldInstance>,
    pub(crate) storage: Storage,
    pub(crate) superclass_state: Option<Box<dyn Any + Send>>,
    pub(crate) class_state: Option<Box<dyn Any + Send>>,
    pub(crate) type_state: Option<Box<dyn Any + Send>>,
    pub(crate) state: RecordState,
    pub(crate) parents: Vec<DependencyEdge>,
    pub(crate) children: Vec<DependencyEdge>,
    pub(crate) prev: Option<RecordHandle>,
    pub(crate) next: Option<RecordHandle>,
    pub(crate) last_update: Option<Timestamp>,
}

impl Record {
    /// Allocates storage for every field of `driver` and fills in the identity triple.
    pub(crate) fn allocate(
        handle: RecordHandle,
        driver: Arc<DriverEntry>,
        precision: i64,
    ) -> Result<Self> {
        let mut storage = Storage::default();
        for slot in StorageSlot::ALL {
            let size = driver.slot_sizes.get(slot);
            let mut values = Vec::new();
            values.try_reserve_exact(size).map_err(|e| {
                RuntimeError::OutOfMemory(format!("{} slot of '{}': {e}", slot.name(), driver.name))
            })?;
            for offset in 0..size {
                let descriptor = driver
                    .fields
                    .iter()
                    .find(|f| f.slot == slot && f.offset == offset)
                    .ok_or_else(|| {
                        RuntimeError::CorruptDataStructure(format!(
                            "driver '{}' has no field at {} offset {offset}",
                            driver.name,
                            slot.name()
                        ))
                    })?;
                values.push(initial_value(descriptor)?);
            }
            storage.slots[slot.index()] = values;
        }
        let fields = driver
            .fields
            .iter()
            .enumerate()
            .map(|(i, d)| FieldInstance::new(handle, i, d))
            .collect();
        let mut record = Self {
            handle,
            driver,
            fields,
            storage,
            superclass_state: None,
            class_state: None,
            type_state: None,
            state: RecordState::Unconstructed,
            parents: Vec::new(),
            children: Vec::new(),
            prev: None,
            next: None,
            last_update: None,
        };
        let triple = record.driver.triple;
        record.write_index(rec::SUPERCLASS, Scalar::RecordType(triple.superclass))?;
        record.write_index(rec::CLASS, Scalar::RecordType(triple.class))?;
        record.write_index(rec::TYPE, Scalar::RecordType(triple.type_id))?;
        record.write_index(rec::PRECISION, Scalar::Long(precision))?;
        Ok(record)
    }

    pub fn handle(&self) -> RecordHandle {
        self.handle
    }

    pub fn driver(&self) -> &Arc<DriverEntry> {
        &self.driver
    }

    pub fn triple(&self) -> TypeTriple {
        self.driver.triple
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn name(&self) -> &str {
        self.str_at(rec::NAME)
    }

    pub fn label(&self) -> &str {
        self.str_at(rec::LABEL)
    }

    fn str_at(&self, index: usize) -> &str {
        self.value(index)
            .ok()
            .and_then(|v| v.str_at(0))
            .unwrap_or_default()
    }

    pub fn precision(&self) -> i64 {
        self.read_index(rec::PRECISION).unwrap_or(0)
    }

    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_retain(self.read_index::<u64>(rec::RECORD_FLAGS).unwrap_or(0))
    }

    pub(crate) fn set_flags(&mut self, flags: RecordFlags) -> Result<()> {
        self.write_index(rec::RECORD_FLAGS, Scalar::ULong(flags.bits()))
    }

    pub(crate) fn update_flags(&mut self, set: RecordFlags, clear: RecordFlags) -> Result<()> {
        let flags = (self.flags() | set) - clear;
        self.set_flags(flags)
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.driver.field_index(name).ok_or_else(|| {
            RuntimeError::NotFound(format!("field '{name}' in record '{}'", self.name()))
        })
    }

    pub fn field_index_by_label(&self, label: i64) -> Result<usize> {
        self.driver
            .fields
            .iter()
            .position(|f| f.label == Some(label))
            .ok_or_else(|| {
                RuntimeError::NotFound(format!("field label {label} in record '{}'", self.name()))
            })
    }

    pub fn descriptor(&self, index: usize) -> Result<&FieldDescriptor> {
        self.driver.fields.get(index).ok_or_else(|| {
            RuntimeError::IllegalArgument(format!(
                "field index {index} out of range for record '{}'",
                self.name()
            ))
        })
    }

    pub fn descriptors(&self) -> &[FieldDescriptor] {
        &self.driver.fields
    }

    pub fn instance(&self, index: usize) -> Result<&FieldInstance> {
        self.fields.get(index).ok_or_else(|| {
            RuntimeError::IllegalArgument(format!("field index {index} out of range"))
        })
    }

    pub fn instance_mut(&mut self, index: usize) -> Result<&mut FieldInstance> {
        self.fields.get_mut(index).ok_or_else(|| {
            RuntimeError::IllegalArgument(format!("field index {index} out of range"))
        })
    }

    pub fn value(&self, index: usize) -> Result<&FieldValue> {
        let instance = self.instance(index)?;
        self.storage
            .get(instance.slot, instance.offset)
            .ok_or_else(|| self.missing_storage(index))
    }

    pub(crate) fn value_mut(&mut self, index: usize) -> Result<&mut FieldValue> {
        let (slot, offset) = {
            let instance = self.instance(index)?;
            (instance.slot, instance.offset)
        };
        if self.storage.get(slot, offset).is_none() {
            return Err(self.missing_storage(index));
        }
        self.storage
            .get_mut(slot, offset)
            .ok_or_else(|| RuntimeError::CorruptDataStructure("storage vanished".into()))
    }

    fn missing_storage(&self, index: usize) -> RuntimeError {
        RuntimeError::CorruptDataStructure(format!(
            "field {index} of record '{}' has no storage",
            self.name()
        ))
    }

    pub fn value_by_name(&self, name: &str) -> Result<&FieldValue> {
        self.value(self.field_index(name)?)
    }

    pub fn read<T: FieldScalar>(&self, name: &str) -> Result<T> {
        self.read_index(self.field_index(name)?)
    }

    pub fn read_index<T: FieldScalar>(&self, index: usize) -> Result<T> {
        self.value(index)?.read()
    }

    pub fn read_vec<T: FieldScalar>(&self, name: &str) -> Result<Vec<T>> {
        self.value_by_name(name)?.to_vec()
    }

    /// Driver-side write of a non-reference field. Ignores the read-only flag.
    pub fn write<T: FieldScalar>(&mut self, name: &str, value: T) -> Result<()> {
        let index = self.field_index(name)?;
        self.write_index(index, value.into_scalar())
    }

    pub fn write_index(&mut self, index: usize, value: Scalar) -> Result<()> {
        self.set_element(index, 0, value)
    }

    /// Stores one element of a non-reference field.
    ///
    /// Reference fields must go through [`crate::RecordList::set_reference`] so that
    /// dependency edges stay in step.
    pub fn set_element(&mut self, index: usize, element: usize, value: Scalar) -> Result<()> {
        let flags = self.descriptor(index)?.flags;
        let datatype = self.descriptor(index)?.datatype;
        if datatype.is_reference() {
            return Err(RuntimeError::IllegalArgument(format!(
                "{datatype} field '{}' must be set through the record list",
                self.descriptor(index)?.name
            )));
        }
        self.value_mut(index)?.set(element, value)?;
        self.touch(flags);
        Ok(())
    }

    pub fn write_vec<T: FieldScalar>(&mut self, name: &str, values: Vec<T>) -> Result<()> {
        let index = self.field_index(name)?;
        let descriptor = self.descriptor(index)?;
        let flags = descriptor.flags;
        if descriptor.datatype.is_reference() {
            return Err(RuntimeError::IllegalArgument(format!(
                "reference field '{}' must be set through the record list",
                descriptor.name
            )));
        }
        self.value_mut(index)?.write_all(values)?;
        self.touch(flags);
        Ok(())
    }

    pub(crate) fn touch(&mut self, flags: FieldFlags) {
        if !flags.contains(FieldFlags::NO_TIMESTAMP) {
            self.last_update = Some(Timestamp::now());
        }
    }

    pub fn parents(&self) -> &[DependencyEdge] {
        &self.parents
    }

    pub fn children(&self) -> &[DependencyEdge] {
        &self.children
    }

    pub fn prev(&self) -> Option<RecordHandle> {
        self.prev
    }

    pub fn next(&self) -> Option<RecordHandle> {
        self.next
    }

    pub fn superclass_state<T: Any>(&self) -> Option<&T> {
        self.superclass_state.as_ref().and_then(|s| s.downcast_ref())
    }

    pub fn superclass_state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.superclass_state.as_mut().and_then(|s| s.downcast_mut())
    }

    pub fn set_superclass_state<T: Any + Send>(&mut self, state: T) {
        self.superclass_state = Some(Box::new(state));
    }

    pub fn class_state<T: Any>(&self) -> Option<&T> {
        self.class_state.as_ref().and_then(|s| s.downcast_ref())
    }

    pub fn class_state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.class_state.as_mut().and_then(|s| s.downcast_mut())
    }

    pub fn set_class_state<T: Any + Send>(&mut self, state: T) {
        self.class_state = Some(Box::new(state));
    }

    pub fn type_state<T: Any>(&self) -> Option<&T> {
        self.type_state.as_ref().and_then(|s| s.downcast_ref())
    }

    pub fn type_state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.type_state.as_mut().and_then(|s| s.downcast_mut())
    }

    pub fn set_type_state<T: Any + Send>(&mut self, state: T) {
        self.type_state = Some(Box::new(state));
    }

    pub(crate) fn release_states(&mut self) {
        self.type_state = None;
        self.class_state = None;
        self.superclass_state = None;
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("handle", &self.handle)
            .field("name", &self.name())
            .field("driver", &self.driver.name)
            .field("state", &self.state)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::record_standard_fields;
    use crate::{ids, ErrorKind, PlainRecordDriver};

    fn test_record() -> Record {
        let mut fields = record_standard_fields();
        fields.push(FieldDescriptor::new("gain", FieldType::Double, StorageSlot::Type, 0));
        fields.push(FieldDescriptor::new("peer", FieldType::Record, StorageSlot::Type, 1));
        fields.push(
            FieldDescriptor::new("quiet", FieldType::Long, StorageSlot::Type, 2)
                .flags(FieldFlags::NO_TIMESTAMP),
        );
        let driver = DriverEntry::new(
            "test",
            TypeTriple::new(ids::SUPERCLASS_DEVICE, 900, 1),
            Arc::new(PlainRecordDriver),
            fields,
        );
        let handle = RecordHandle {
            index: 0,
            generation: 0,
        };
        Record::allocate(handle, Arc::new(driver), 3).unwrap()
    }

    #[test]
    fn test_allocate_sets_identity() {
        let record = test_record();
        assert_eq!(record.state(), RecordState::Unconstructed);
        assert_eq!(record.read_index::<i64>(rec::PRECISION).unwrap(), 3);
        assert_eq!(record.triple().type_id, 1);
        assert_eq!(record.name(), "");
        assert_eq!(record.flags(), RecordFlags::empty());
    }

    #[test]
    fn test_read_write_by_name() {
        let mut record = test_record();
        record.write("gain", 2.5f64).unwrap();
        assert_eq!(record.read::<f64>("gain").unwrap(), 2.5);
        assert!(record.last_update().is_some());
        let err = record.read::<f64>("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_no_timestamp_fields_do_not_touch() {
        let mut record = test_record();
        record.write("quiet", 4i64).unwrap();
        assert!(record.last_update().is_none());
    }

    #[test]
    fn test_reference_fields_rejected_on_direct_write() {
        let mut record = test_record();
        let err = record.write::<Option<RecordHandle>>("peer", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }

    #[test]
    fn test_flags_roundtrip() {
        let mut record = test_record();
        record
            .update_flags(RecordFlags::OPEN | RecordFlags::FAULTED, RecordFlags::empty())
            .unwrap();
        record
            .update_flags(RecordFlags::empty(), RecordFlags::FAULTED)
            .unwrap();
        assert_eq!(record.flags(), RecordFlags::OPEN);
    }

    #[test]
    fn test_opaque_state_slots() {
        let mut record = test_record();
        record.set_type_state(17u32);
        assert_eq!(record.type_state::<u32>(), Some(&17));
        assert!(record.type_state::<String>().is_none());
        *record.type_state_mut::<u32>().unwrap() = 18;
        assert_eq!(record.type_state::<u32>(), Some(&18));
        record.release_states();
        assert!(record.type_state::<u32>().is_none());
    }
}
