use crate::fields::variable_fields;
use record_runtime::{
    ids, DriverEntry, DriverRegistry, FieldType, RecordDriver, RecordHandle, RecordList, Result,
    TypeTriple,
};
use std::sync::Arc;
use tracing::trace;

/// Value transfer hooks of a variable superclass driver.
///
/// Inline variables keep their value in the record itself, so both hooks are no-ops
/// by default. Network-backed variables would push or pull the value here.
pub trait VariableDriver: Send + Sync {
    fn send_value(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }

    fn receive_value(&self, _list: &mut RecordList, _record: RecordHandle) -> Result<()> {
        Ok(())
    }
}

/// Superclass function table as stored in a [`DriverEntry`].
pub struct VariableFunctions(pub Arc<dyn VariableDriver>);

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineVariable;

impl RecordDriver for InlineVariable {}

impl VariableDriver for InlineVariable {
    fn send_value(&self, list: &mut RecordList, record: RecordHandle) -> Result<()> {
        let name = list.name_of(record)?;
        trace!(record = %name, "inline variable send");
        Ok(())
    }
}

pub const INLINE_CLASS_NAME: &str = "inline";
const TYPE_BASE: i64 = 61000;

/// Type id of the inline variable driver for `datatype`.
pub fn inline_type_id(datatype: FieldType) -> i64 {
    let position = FieldType::ALL
        .iter()
        .position(|t| *t == datatype)
        .unwrap_or_default();
    TYPE_BASE + 1 + position as i64
}

/// Driver name for `datatype`, e.g. `double_variable`.
pub fn inline_driver_name(datatype: FieldType) -> String {
    format!("{}_variable", datatype.name())
}

/// One inline variable driver per datatype.
pub fn inline_variable_drivers() -> Vec<DriverEntry> {
    let driver = Arc::new(InlineVariable);
    FieldType::ALL
        .iter()
        .map(|&datatype| {
            DriverEntry::new(
                inline_driver_name(datatype),
                TypeTriple::new(
                    ids::SUPERCLASS_VARIABLE,
                    ids::CLASS_INLINE_VARIABLE,
                    inline_type_id(datatype),
                ),
                driver.clone(),
                variable_fields(datatype),
            )
            .with_superclass_functions(Arc::new(VariableFunctions(driver.clone())))
        })
        .collect()
}

/// Registers the `inline` class and every inline variable driver.
pub fn register_inline_variables(registry: &mut DriverRegistry) -> Result<()> {
    registry.register_class(
        INLINE_CLASS_NAME,
        ids::SUPERCLASS_VARIABLE,
        ids::CLASS_INLINE_VARIABLE,
    )?;
    registry.register(inline_variable_drivers())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::var;
    use crate::testing::variable_list;
    use record_runtime::{CreationFlags, ErrorKind, MAX_DIMENSIONS};

    fn sample(datatype: FieldType, i: usize) -> String {
        match datatype {
            FieldType::String => format!("\"s{i}\""),
            FieldType::Char => "-5".into(),
            FieldType::UChar => "200".into(),
            FieldType::Short => "-300".into(),
            FieldType::UShort => "60000".into(),
            FieldType::Bool => (if i % 2 == 0 { "0" } else { "1" }).into(),
            FieldType::Long => format!("-{}", i * 1000),
            FieldType::ULong => i.to_string(),
            FieldType::Float => "1.5".into(),
            FieldType::Double => "-0.1".into(),
            FieldType::Hex => "0xff".into(),
            FieldType::Int64 => "-9000000000".into(),
            FieldType::UInt64 => "18000000000000000000".into(),
            FieldType::Record => "target".into(),
            FieldType::RecordType => "double_variable".into(),
            FieldType::Interface => "target:ctl".into(),
            FieldType::RecordField => "target.value".into(),
        }
    }

    fn group(datatype: FieldType, extents: &[usize], next: &mut usize) -> String {
        let Some((&len, inner)) = extents.split_first() else {
            *next += 1;
            return sample(datatype, *next);
        };
        let mut parts = vec!["(".to_string()];
        for _ in 0..len {
            parts.push(group(datatype, inner, next));
        }
        parts.push(")".into());
        parts.join(" ")
    }

    fn description(name: &str, datatype: FieldType, extents: &[usize]) -> String {
        let mut dims = vec!["(".to_string()];
        dims.extend(extents.iter().map(|e| e.to_string()));
        dims.push(")".into());
        let element_extents = if datatype == FieldType::String {
            &extents[..extents.len() - 1]
        } else {
            extents
        };
        let value = group(datatype, element_extents, &mut 0);
        format!(
            "{name} variable inline {} \"\" {} {} {value}",
            inline_driver_name(datatype),
            extents.len(),
            dims.join(" ")
        )
    }

    fn shape(datatype: FieldType, rank: usize, lead: usize) -> Vec<usize> {
        let mut extents = vec![1; rank];
        if let Some(first) = extents.first_mut() {
            *first = lead;
        }
        if datatype == FieldType::String {
            if let Some(last) = extents.last_mut() {
                *last = 8;
            }
        }
        extents
    }

    fn assert_round_trip(list: &mut RecordList, line: &str, name: &str) {
        let h = list
            .create_record_from_description(line, CreationFlags::empty())
            .unwrap_or_else(|e| panic!("{line}: {e}"));
        let text = list.create_description_from_record(h).unwrap();
        assert_eq!(text, line);

        let copy_line = text.replacen(name, &format!("{name}_copy"), 1);
        let copy = list
            .create_record_from_description(&copy_line, CreationFlags::empty())
            .unwrap();
        assert_eq!(
            list.record(h).unwrap().value(var::VALUE).unwrap(),
            list.record(copy).unwrap().value(var::VALUE).unwrap()
        );
    }

    fn list_with_target() -> RecordList {
        let mut list = variable_list();
        list.create_record_from_description(
            "target variable inline long_variable \"\" 0 ( ) 5",
            CreationFlags::empty(),
        )
        .unwrap();
        list
    }

    #[test]
    fn test_round_trip_edge_values() {
        let mut list = list_with_target();
        let cases = [
            (FieldType::Double, "0.30000000000000004"),
            (FieldType::Double, "1.7976931348623157e308"),
            (FieldType::Double, "5e-324"),
            (FieldType::Double, "-0.0"),
            (FieldType::Float, "3.4028235e38"),
            (FieldType::Float, "1e-45"),
            (FieldType::Long, "-9223372036854775808"),
            (FieldType::UInt64, "18446744073709551615"),
            (FieldType::Char, "-128"),
        ];
        for (index, (datatype, token)) in cases.into_iter().enumerate() {
            let name = format!("edge{index}");
            let line = format!(
                "{name} variable inline {} \"\" 0 ( ) {token}",
                inline_driver_name(datatype)
            );
            assert_round_trip(&mut list, &line, &name);
        }

        let h = list.find("edge3").unwrap();
        let zero: f64 = list.record(h).unwrap().value(var::VALUE).unwrap().read().unwrap();
        assert!(zero == 0.0 && zero.is_sign_negative());
        let h = list.find("edge2").unwrap();
        let tiny: f64 = list.record(h).unwrap().value(var::VALUE).unwrap().read().unwrap();
        assert_eq!(tiny.to_bits(), 1);

        let strings = [r#""""#, r#""say \"hi\"""#, r#""(a) b""#, r#""c:\\tmp""#];
        for (index, token) in strings.into_iter().enumerate() {
            let name = format!("text{index}");
            let line = format!("{name} variable inline string_variable \"\" 1 ( 16 ) {token}");
            assert_round_trip(&mut list, &line, &name);
        }
        let h = list.find("text1").unwrap();
        let text: String = list.record(h).unwrap().value(var::VALUE).unwrap().read().unwrap();
        assert_eq!(text, "say \"hi\"");
    }

    #[test]
    fn test_round_trip_every_datatype_and_rank() {
        let mut list = list_with_target();
        for (index, datatype) in FieldType::ALL.into_iter().enumerate() {
            let lowest = usize::from(datatype == FieldType::String);
            for rank in lowest..=MAX_DIMENSIONS {
                let name = format!("v{index}_{rank}");
                let line = description(&name, datatype, &shape(datatype, rank, 2));
                assert_round_trip(&mut list, &line, &name);
            }
        }
    }

    #[test]
    fn test_round_trip_empty_and_full_extents() {
        let mut list = list_with_target();
        let cases: [(&str, FieldType, Vec<usize>); 5] = [
            ("empty", FieldType::Long, vec![0]),
            ("empty_rows", FieldType::Double, vec![2, 0]),
            ("no_strings", FieldType::String, vec![0, 8]),
            ("cube", FieldType::ULong, vec![2; MAX_DIMENSIONS]),
            ("refs", FieldType::Record, vec![3]),
        ];
        for (name, datatype, extents) in cases {
            let line = description(name, datatype, &extents);
            assert_round_trip(&mut list, &line, name);
        }
        let cube = list.get("cube").unwrap();
        assert_eq!(
            list.record(cube).unwrap().value(var::VALUE).unwrap().element_count(),
            256
        );
    }

    #[test]
    fn test_rank_limits() {
        let mut list = variable_list();
        let err = list
            .create_record_from_description(
                "deep variable inline long_variable \"\" 9 ( 1 1 1 1 1 1 1 1 1 ) 5",
                CreationFlags::empty(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldExceedLimit);

        let err = list
            .create_record_from_description(
                "flat variable inline string_variable \"\" 0 ( ) \"x\"",
                CreationFlags::empty(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        assert!(list.is_empty());
    }

    #[test]
    fn test_every_datatype_registers() {
        let mut registry = DriverRegistry::new();
        register_inline_variables(&mut registry).unwrap();
        assert_eq!(registry.len(), FieldType::ALL.len());
        let entry = registry.lookup_by_name("double_variable").unwrap();
        assert_eq!(entry.triple.type_id, inline_type_id(FieldType::Double));
        assert!(entry.superclass_functions_as::<VariableFunctions>().is_some());
        assert!(registry.lookup_by_name("record_field_variable").is_some());
        registry.validate_all().unwrap();
    }

    #[test]
    fn test_registering_twice_is_rejected() {
        let mut registry = DriverRegistry::new();
        register_inline_variables(&mut registry).unwrap();
        let err = register_inline_variables(&mut registry).unwrap_err();
        assert_eq!(err.kind(), record_runtime::ErrorKind::DuplicateType);
        assert_eq!(registry.len(), FieldType::ALL.len());
    }
}
