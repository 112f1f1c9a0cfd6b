//! Runtime type metadata.
//!
//! Components are described by [`TypeInfo`] and held as [`Instance`]s; methods
//! are dispatched dynamically so proxies can stand in for their targets.

pub mod conversion;
pub mod instance;
pub mod invocation;
pub mod method;
pub mod type_info;
pub mod weight;

pub use conversion::{SimpleTypeConverter, TypeConverter};
pub use instance::Instance;
pub use invocation::{ErrorKind, InvocationError, InvocationResult};
pub use method::{Method, MethodBody, MethodSignature, ReturnType};
pub use type_info::{TypeBuilder, TypeInfo, TypeKind};
pub use weight::{assignability_weight, type_difference_weight};
