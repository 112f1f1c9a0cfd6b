//! Automatic proxying of beans as the factory creates them.

mod creator;
mod selector;
mod target_source_creator;

pub use creator::AutoProxyCreator;
pub use selector::{AdvisorSelector, BeanNameSelector, FactoryAdvisorSelector};
pub use target_source_creator::{PooledTargetSourceCreator, PrototypeTargetSourceCreator, TargetSourceCreator};
