use crate::drivers::VariableFunctions;
use crate::fields::var;
use record_runtime::{
    ids, FieldScalar, FieldType, FieldValue, RecordHandle, RecordList, Result, RuntimeError, Scalar,
};
use std::sync::Arc;

/// Shape and type of a variable's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableParameters {
    pub num_dimensions: usize,
    pub dimension: Vec<usize>,
    pub datatype: FieldType,
}

fn check_variable(list: &RecordList, record: RecordHandle) -> Result<Option<Arc<VariableFunctions>>> {
    let record = list.record(record)?;
    if record.triple().superclass != ids::SUPERCLASS_VARIABLE {
        return Err(RuntimeError::TypeMismatch(format!(
            "record '{}' is not a variable",
            record.name()
        )));
    }
    Ok(record.driver().superclass_functions_as::<VariableFunctions>())
}

/// Pushes the stored value out through the driver.
pub fn send_variable(list: &mut RecordList, record: RecordHandle) -> Result<()> {
    match check_variable(list, record)? {
        Some(functions) => functions.0.send_value(list, record),
        None => Ok(()),
    }
}

/// Refreshes the stored value from the driver.
pub fn receive_variable(list: &mut RecordList, record: RecordHandle) -> Result<()> {
    match check_variable(list, record)? {
        Some(functions) => functions.0.receive_value(list, record),
        None => Ok(()),
    }
}

pub fn variable_parameters(list: &RecordList, record: RecordHandle) -> Result<VariableParameters> {
    check_variable(list, record)?;
    let value = list.record(record)?.value(var::VALUE)?;
    Ok(VariableParameters {
        num_dimensions: value.rank(),
        dimension: value.extents().to_vec(),
        datatype: value.datatype(),
    })
}

fn single_valued(value: &FieldValue, name: &str) -> Result<()> {
    if value.element_count() != 1 {
        return Err(RuntimeError::IllegalArgument(format!(
            "variable '{name}' holds {} elements, not one",
            value.element_count()
        )));
    }
    Ok(())
}

fn one_dimensional(value: &FieldValue, name: &str) -> Result<()> {
    if value.element_extents().len() != 1 {
        return Err(RuntimeError::IllegalArgument(format!(
            "variable '{name}' is not a one-dimensional array"
        )));
    }
    Ok(())
}

/// Reads a single-valued variable after receiving it.
pub fn get_variable<T: FieldScalar>(list: &mut RecordList, record: RecordHandle) -> Result<T> {
    receive_variable(list, record)?;
    let r = list.record(record)?;
    let value = r.value(var::VALUE)?;
    single_valued(value, r.name())?;
    value.read()
}

/// Stores into a single-valued variable, then sends it.
pub fn set_variable<T: FieldScalar>(list: &mut RecordList, record: RecordHandle, value: T) -> Result<()> {
    check_variable(list, record)?;
    let datatype = {
        let r = list.record(record)?;
        let current = r.value(var::VALUE)?;
        single_valued(current, r.name())?;
        current.datatype()
    };
    if datatype.is_reference() {
        list.set_reference(record, var::VALUE, 0, value.into_scalar())?;
    } else {
        list.record_mut(record)?
            .set_element(var::VALUE, 0, value.into_scalar())?;
    }
    send_variable(list, record)
}

pub fn get_variable_by_name<T: FieldScalar>(list: &mut RecordList, name: &str) -> Result<T> {
    let record = list.get(name)?;
    get_variable(list, record)
}

pub fn get_1d_array<T: FieldScalar>(list: &mut RecordList, record: RecordHandle) -> Result<Vec<T>> {
    receive_variable(list, record)?;
    let r = list.record(record)?;
    let value = r.value(var::VALUE)?;
    one_dimensional(value, r.name())?;
    value.to_vec()
}

/// Replaces the contents of a one-dimensional variable, resizing it to `values.len()`.
///
/// Every element is converted before anything is stored, so a type mismatch leaves
/// both the value and its dimension untouched.
pub fn set_1d_array<T: FieldScalar>(list: &mut RecordList, record: RecordHandle, values: Vec<T>) -> Result<()> {
    check_variable(list, record)?;
    let (datatype, mut shape) = {
        let r = list.record(record)?;
        let value = r.value(var::VALUE)?;
        one_dimensional(value, r.name())?;
        (value.datatype(), value.extents().to_vec())
    };
    if datatype.is_reference() {
        return Err(RuntimeError::IllegalArgument(format!(
            "{datatype} arrays must be set element by element"
        )));
    }
    let len = values.len();
    shape[0] = len;
    let mut staged = FieldValue::new(datatype, shape)?;
    for (i, v) in values.into_iter().enumerate() {
        staged.set(i, v.into_scalar())?;
    }

    list.record_mut(record)?
        .set_element(var::DIMENSION, 0, Scalar::Long(len as i64))?;
    list.resolve_field_shape(record, var::VALUE)?;
    let r = list.record_mut(record)?;
    for i in 0..len {
        r.set_element(var::VALUE, i, staged.get(i)?)?;
    }
    send_variable(list, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::variable_list;
    use record_runtime::{CreationFlags, ErrorKind};

    fn create(list: &mut RecordList, line: &str) -> RecordHandle {
        list.create_record_from_description(line, CreationFlags::empty())
            .unwrap()
    }

    #[test]
    fn test_scalar_get_set() {
        let mut list = variable_list();
        let h = create(&mut list, "gain variable inline double_variable \"\" 0 ( ) 1.5");
        assert_eq!(get_variable::<f64>(&mut list, h).unwrap(), 1.5);
        set_variable(&mut list, h, 2.25f64).unwrap();
        assert_eq!(get_variable_by_name::<f64>(&mut list, "gain").unwrap(), 2.25);

        let err = set_variable(&mut list, h, "x".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(get_variable::<f64>(&mut list, h).unwrap(), 2.25);
    }

    #[test]
    fn test_widening_reads() {
        let mut list = variable_list();
        let h = create(&mut list, "small variable inline short_variable \"\" 0 ( ) -7");
        assert_eq!(get_variable::<i64>(&mut list, h).unwrap(), -7);
        assert_eq!(get_variable::<f64>(&mut list, h).unwrap(), -7.0);
        let err = get_variable::<u8>(&mut list, h).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_string_variable() {
        let mut list = variable_list();
        let h = create(&mut list, "motd variable inline string_variable \"\" 1 ( 12 ) \"hello\"");
        assert_eq!(get_variable::<String>(&mut list, h).unwrap(), "hello");
        let err = set_variable(&mut list, h, "far too long for it".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldExceedLimit);
        assert_eq!(get_variable::<String>(&mut list, h).unwrap(), "hello");
    }

    #[test]
    fn test_one_dimensional_arrays() {
        let mut list = variable_list();
        let h = create(&mut list, "gains variable inline double_variable \"\" 1 ( 3 ) ( 1.5 2.5 3.5 )");
        assert_eq!(get_1d_array::<f64>(&mut list, h).unwrap(), vec![1.5, 2.5, 3.5]);
        assert!(get_variable::<f64>(&mut list, h).is_err());

        set_1d_array(&mut list, h, vec![4.0f64, 5.0]).unwrap();
        let params = variable_parameters(&list, h).unwrap();
        assert_eq!(params.dimension, vec![2]);
        assert_eq!(list.record(h).unwrap().read_vec::<i64>("dimension").unwrap(), vec![2]);
        assert_eq!(
            list.create_description_from_record(h).unwrap(),
            "gains variable inline double_variable \"\" 1 ( 2 ) ( 4.0 5.0 )"
        );

        let err = set_1d_array(&mut list, h, vec![true]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(get_1d_array::<f64>(&mut list, h).unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_multi_dimensional_rejects_1d_helpers() {
        let mut list = variable_list();
        let h = create(
            &mut list,
            "grid variable inline long_variable \"\" 2 ( 2 2 ) ( ( 1 2 ) ( 3 4 ) )",
        );
        let params = variable_parameters(&list, h).unwrap();
        assert_eq!(params.num_dimensions, 2);
        assert_eq!(params.datatype, FieldType::Long);
        let err = get_1d_array::<i64>(&mut list, h).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        assert_eq!(
            list.record(h).unwrap().read_vec::<i64>("value").unwrap(),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn test_record_variable_tracks_dependency() {
        let mut list = variable_list();
        let target = create(&mut list, "target variable inline long_variable \"\" 0 ( ) 1");
        let other = create(&mut list, "other variable inline long_variable \"\" 0 ( ) 2");
        let h = create(&mut list, "link variable inline record_variable \"\" 0 ( ) target");
        assert_eq!(list.dependencies(h).unwrap(), vec![target]);
        set_variable(&mut list, h, Some(other)).unwrap();
        assert_eq!(list.dependencies(h).unwrap(), vec![other]);
        assert!(list.dependents(target).unwrap().is_empty());
    }
}
