//! record-variable: inline variable records holding one value of any field
//! type, rank 0 through 8

mod fields;
pub use fields::{var, variable_fields};

mod drivers;
pub use drivers::{
    inline_driver_name, inline_type_id, inline_variable_drivers, register_inline_variables,
    InlineVariable, VariableDriver, VariableFunctions, INLINE_CLASS_NAME,
};

mod ops;
pub use ops::{
    get_1d_array, get_variable, get_variable_by_name, receive_variable, send_variable,
    set_1d_array, set_variable, variable_parameters, VariableParameters,
};

#[cfg(test)]
pub(crate) mod testing;
