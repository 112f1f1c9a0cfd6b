//! The join point handed to interceptors.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{Instance, InvocationResult, Method, TypeInfo};

use crate::chain::InterceptorChainElement;
use crate::error::AopError;

/// A method call in progress on a proxy.
///
/// Interceptors call [`proceed`](MethodInvocation::proceed) to hand control to
/// the next interceptor, and the last one to the target method.
pub trait MethodInvocation {
    fn method(&self) -> &Method;
    fn arguments(&self) -> &[Instance];

    /// Replace the arguments passed further down the chain
    fn set_arguments(&mut self, arguments: Vec<Instance>);

    /// Target object, if the target source produced one
    fn this(&self) -> Option<&Instance>;

    fn proxy(&self) -> &Instance;
    fn target_class(&self) -> Option<&TypeInfo>;
    fn proceed(&mut self) -> InvocationResult;

    /// Independent copy positioned at the same interceptor; proceeding it does
    /// not advance this invocation
    fn invocable_clone(&self) -> Box<dyn MethodInvocation>;

    fn user_attribute(&self, key: &str) -> Option<&Instance>;
    fn set_user_attribute(&mut self, key: &str, value: Option<Instance>);
}

/// Walks an interceptor chain, then invokes the target method
#[derive(Clone)]
pub struct ReflectiveMethodInvocation {
    proxy: Instance,
    target: Option<Instance>,
    method: Method,
    arguments: Vec<Instance>,
    target_class: Option<TypeInfo>,
    chain: Arc<Vec<InterceptorChainElement>>,
    current_index: usize,
    user_attributes: HashMap<String, Instance>,
}

impl ReflectiveMethodInvocation {
    pub fn new(
        proxy: Instance,
        target: Option<Instance>,
        method: Method,
        arguments: Vec<Instance>,
        target_class: Option<TypeInfo>,
        chain: Arc<Vec<InterceptorChainElement>>,
    ) -> Self {
        Self {
            proxy,
            target,
            method,
            arguments,
            target_class,
            chain,
            current_index: 0,
            user_attributes: HashMap::new(),
        }
    }

    fn method_owner(&self) -> TypeInfo {
        self.proxy.type_info().clone()
    }

    fn invoke_joinpoint(&self) -> InvocationResult {
        match &self.target {
            Some(target) => target.invoke_method(&self.method, &self.arguments),
            None => Err(AopError::invocation(format!(
                "No target available to invoke method [{}] on",
                self.method
            ))
            .into()),
        }
    }
}

impl MethodInvocation for ReflectiveMethodInvocation {
    fn method(&self) -> &Method {
        &self.method
    }

    fn arguments(&self) -> &[Instance] {
        &self.arguments
    }

    fn set_arguments(&mut self, arguments: Vec<Instance>) {
        self.arguments = arguments;
    }

    fn this(&self) -> Option<&Instance> {
        self.target.as_ref()
    }

    fn proxy(&self) -> &Instance {
        &self.proxy
    }

    fn target_class(&self) -> Option<&TypeInfo> {
        self.target_class.as_ref()
    }

    fn proceed(&mut self) -> InvocationResult {
        if self.current_index >= self.chain.len() {
            return self.invoke_joinpoint();
        }
        let chain = self.chain.clone();
        let element = &chain[self.current_index];
        self.current_index += 1;
        match element {
            InterceptorChainElement::Static(interceptor) => interceptor.invoke(self),
            InterceptorChainElement::Dynamic { interceptor, matcher } => {
                let target_class = self
                    .target_class
                    .clone()
                    .unwrap_or_else(|| self.method_owner());
                if matcher.matches_runtime(&self.method, &target_class, &self.arguments) {
                    interceptor.invoke(self)
                } else {
                    // skip this interceptor and carry on down the chain
                    self.proceed()
                }
            }
        }
    }

    fn invocable_clone(&self) -> Box<dyn MethodInvocation> {
        Box::new(self.clone())
    }

    fn user_attribute(&self, key: &str) -> Option<&Instance> {
        self.user_attributes.get(key)
    }

    fn set_user_attribute(&mut self, key: &str, value: Option<Instance>) {
        match value {
            Some(value) => {
                self.user_attributes.insert(key.to_string(), value);
            }
            None => {
                self.user_attributes.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for ReflectiveMethodInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectiveMethodInvocation")
            .field("method", &self.method.key())
            .field("target", &self.target)
            .field("current_index", &self.current_index)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::MethodInterceptor;
    use parking_lot::Mutex;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl MethodInterceptor for Recording {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            self.log.lock().push(format!("{}>", self.label));
            let result = invocation.proceed();
            self.log.lock().push(format!("<{}", self.label));
            result
        }
    }

    fn greeter() -> (Instance, Method, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let target_log = log.clone();
        let ty = TypeInfo::class("Greeter")
            .method(
                Method::new("greet")
                    .param(TypeInfo::string())
                    .returns(TypeInfo::string())
                    .body(move |_, args| {
                        target_log.lock().push("target".to_string());
                        let name = args.first().and_then(Instance::as_str).unwrap_or("?");
                        Ok(Some(Instance::string(format!("hello {}", name))))
                    }),
            )
            .build();
        let method = ty.methods_named("greet").remove(0);
        (Instance::new((), ty), method, log)
    }

    #[test]
    fn test_chain_runs_in_order_around_target() {
        let (target, method, log) = greeter();
        let chain: Vec<InterceptorChainElement> = ["x", "y"]
            .into_iter()
            .map(|label| {
                InterceptorChainElement::Static(Arc::new(Recording {
                    label,
                    log: log.clone(),
                }))
            })
            .collect();
        let mut invocation = ReflectiveMethodInvocation::new(
            target.clone(),
            Some(target.clone()),
            method,
            vec![Instance::string("ann")],
            Some(target.type_info().clone()),
            Arc::new(chain),
        );

        let result = invocation.proceed().unwrap().unwrap();

        assert_eq!(result.as_str(), Some("hello ann"));
        assert_eq!(*log.lock(), vec!["x>", "y>", "target", "<y", "<x"]);
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let (proxy, method, _) = greeter();
        let mut invocation =
            ReflectiveMethodInvocation::new(proxy, None, method, vec![], None, Arc::new(Vec::new()));

        let err = invocation.proceed().unwrap_err();
        assert!(err.to_string().contains("No target available"));
    }

    #[test]
    fn test_clone_proceeds_independently() {
        let (target, method, log) = greeter();
        let mut invocation = ReflectiveMethodInvocation::new(
            target.clone(),
            Some(target),
            method,
            vec![Instance::string("bo")],
            None,
            Arc::new(Vec::new()),
        );
        invocation.set_user_attribute("attempt", Some(Instance::int(1)));

        let mut copy = invocation.invocable_clone();
        copy.proceed().unwrap();
        invocation.proceed().unwrap();

        assert_eq!(log.lock().len(), 2);
        assert_eq!(copy.user_attribute("attempt").and_then(Instance::as_int), Some(1));
    }
}
