use std::cell::RefCell;

use trellis_core::Instance;

use crate::error::AopError;

thread_local! {
    static CURRENT_PROXY: RefCell<Option<Instance>> = const { RefCell::new(None) };
}

/// Access to the proxy handling the current call on this thread.
///
/// Only populated when the proxy was created with `expose_proxy` enabled.
/// Targets use it to call their own methods through the proxy so that
/// advice applies to self-invocations.
pub struct AopContext;

impl AopContext {
    pub fn current_proxy() -> Result<Instance, AopError> {
        CURRENT_PROXY
            .with(|current| current.borrow().clone())
            .ok_or(AopError::NoCurrentProxy)
    }

    /// Install `proxy` as the current proxy, returning the previous one
    pub(crate) fn set_current_proxy(proxy: Option<Instance>) -> Option<Instance> {
        CURRENT_PROXY.with(|current| current.replace(proxy))
    }
}

/// Exposes a proxy for the duration of a call and restores the previous one on drop
pub(crate) struct ProxyExposure {
    previous: Option<Instance>,
}

impl ProxyExposure {
    pub(crate) fn enter(proxy: &Instance) -> Self {
        Self {
            previous: AopContext::set_current_proxy(Some(proxy.clone())),
        }
    }
}

impl Drop for ProxyExposure {
    fn drop(&mut self) {
        AopContext::set_current_proxy(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_nests_and_restores() {
        assert!(matches!(AopContext::current_proxy(), Err(AopError::NoCurrentProxy)));

        let outer = Instance::string("outer");
        let inner = Instance::string("inner");
        {
            let _outer = ProxyExposure::enter(&outer);
            {
                let _inner = ProxyExposure::enter(&inner);
                assert!(AopContext::current_proxy().unwrap().ptr_eq(&inner));
            }
            assert!(AopContext::current_proxy().unwrap().ptr_eq(&outer));
        }
        assert!(AopContext::current_proxy().is_err());
    }
}
