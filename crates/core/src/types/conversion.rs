use super::instance::Instance;
use super::type_info::{TypeInfo, TypeKind};
use crate::errors::CoreError;

/// Converts values to the type a parameter or property requires
pub trait TypeConverter: Send + Sync {
    fn convert_if_necessary(&self, value: &Instance, required: &TypeInfo) -> Result<Instance, CoreError>;
}

/// Converter for string literals and simple values.
///
/// Assignable values pass through untouched. String literals become ints,
/// floats or booleans; simple values become strings; collection elements are
/// converted one by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTypeConverter;

impl SimpleTypeConverter {
    pub fn new() -> Self {
        Self
    }

    fn parse_bool(text: &str) -> Option<bool> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    fn mismatch(value: &Instance, required: &TypeInfo) -> CoreError {
        CoreError::type_mismatch(value.type_info().name(), required.name())
    }
}

impl TypeConverter for SimpleTypeConverter {
    fn convert_if_necessary(&self, value: &Instance, required: &TypeInfo) -> Result<Instance, CoreError> {
        if required.is_assignable_from(value.type_info()) {
            return Ok(value.clone());
        }

        if let Some(text) = value.as_str() {
            let converted = match required.name() {
                "int" => text.trim().parse::<i64>().ok().map(Instance::int),
                "float" => text.trim().parse::<f64>().ok().map(Instance::float),
                "boolean" => Self::parse_bool(text).map(Instance::boolean),
                _ => None,
            };
            return converted.ok_or_else(|| Self::mismatch(value, required));
        }

        if *required == TypeInfo::string() {
            let text = value
                .as_int()
                .map(|i| i.to_string())
                .or_else(|| value.as_float().map(|f| f.to_string()))
                .or_else(|| value.as_bool().map(|b| b.to_string()));
            return text
                .map(Instance::string)
                .ok_or_else(|| Self::mismatch(value, required));
        }

        if let (Some(items), Some(element)) = (value.as_items(), required.element_type()) {
            let converted = items
                .iter()
                .map(|item| self.convert_if_necessary(item, element))
                .collect::<Result<Vec<_>, _>>()?;
            return match required.kind() {
                TypeKind::Array(_) => Ok(Instance::array(element, converted)),
                TypeKind::Collection(_) => Ok(Instance::collection(element, converted)),
                _ => Err(Self::mismatch(value, required)),
            };
        }

        Err(Self::mismatch(value, required))
    }
}
