use std::fmt;

use crate::container::descriptor::LifecycleCallback;
use crate::errors::CoreError;
use crate::types::{Instance, TypeInfo};

/// Hooks into bean creation.
///
/// Every method has a pass-through default so implementations override only
/// the phases they care about. Processors run in registration order.
pub trait BeanPostProcessor: Send + Sync {
    /// Short-circuit instantiation by returning a replacement object
    fn post_process_before_instantiation(
        &self,
        _bean_type: &TypeInfo,
        _bean_name: &str,
    ) -> Result<Option<Instance>, CoreError> {
        Ok(None)
    }

    /// Object to expose when a singleton still in creation is referenced early
    fn get_early_bean_reference(&self, bean: Instance, _bean_name: &str) -> Result<Instance, CoreError> {
        Ok(bean)
    }

    /// Runs before the init callback
    fn post_process_before_initialization(&self, bean: Instance, _bean_name: &str) -> Result<Instance, CoreError> {
        Ok(bean)
    }

    /// Runs after the init callback; may return a wrapper such as a proxy
    fn post_process_after_initialization(&self, bean: Instance, _bean_name: &str) -> Result<Instance, CoreError> {
        Ok(bean)
    }

    /// Whether `post_process_before_instantiation` should be consulted at all
    fn is_instantiation_aware(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Cleanup run when a bean is destroyed
pub trait DisposableBean: Send + Sync {
    fn destroy(&self) -> Result<(), CoreError>;
}

/// Binds a definition's destroy callback to a created instance
pub struct DisposableBeanAdapter {
    bean_name: String,
    bean: Instance,
    callback: LifecycleCallback,
}

impl DisposableBeanAdapter {
    pub fn new(bean_name: impl Into<String>, bean: Instance, callback: LifecycleCallback) -> Self {
        Self {
            bean_name: bean_name.into(),
            bean,
            callback,
        }
    }

    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }
}

impl DisposableBean for DisposableBeanAdapter {
    fn destroy(&self) -> Result<(), CoreError> {
        tracing::trace!("Invoking destroy callback on bean '{}'", self.bean_name);
        (self.callback)(&self.bean)
    }
}

impl fmt::Debug for DisposableBeanAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableBeanAdapter")
            .field("bean_name", &self.bean_name)
            .field("bean", &self.bean)
            .finish()
    }
}
