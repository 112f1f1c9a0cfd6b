use super::instance::Instance;
use super::type_info::TypeInfo;

/// Score how closely `args` match `param_types`; lower is closer.
///
/// The walk starts at the argument's superclass: every step that is still
/// assignable adds 2, hitting the parameter type exactly adds 2 and stops, and
/// an interface-typed parameter adds 1. An exact match therefore scores 0. An
/// argument the parameter cannot accept yields `i32::MAX`.
pub fn type_difference_weight(param_types: &[TypeInfo], args: &[Instance]) -> i32 {
    let mut result: i32 = 0;
    for (param_type, arg) in param_types.iter().zip(args) {
        if !param_type.is_assignable_from(arg.type_info()) {
            return i32::MAX;
        }
        let mut super_class = arg.type_info().superclass().cloned();
        while let Some(current) = super_class {
            if *param_type == current {
                result += 2;
                super_class = None;
            } else if param_type.is_assignable_from(&current) {
                result += 2;
                super_class = current.superclass().cloned();
            } else {
                super_class = None;
            }
        }
        if param_type.is_interface() {
            result += 1;
        }
    }
    result
}

/// Strict matching weight: converted arguments must fit, raw arguments fitting too wins
pub fn assignability_weight(
    param_types: &[TypeInfo],
    arguments: &[Instance],
    raw_arguments: &[Instance],
) -> i32 {
    let fits = |values: &[Instance]| {
        param_types
            .iter()
            .zip(values)
            .all(|(ty, value)| ty.is_assignable_from(value.type_info()))
    };
    if !fits(arguments) {
        return i32::MAX;
    }
    if !fits(raw_arguments) {
        return i32::MAX - 512;
    }
    i32::MAX - 1024
}
