//! Target sources: where a proxy gets the object a call is forwarded to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use trellis_core::{BeanFactory, Instance, TypeInfo};

use crate::error::AopError;

/// Supplies the target for each proxied call.
///
/// Static sources always return the same object, so the proxy may cache it;
/// dynamic sources hand out a target per call and get it back through
/// [`release_target`](TargetSource::release_target).
pub trait TargetSource: Send + Sync {
    fn target_class(&self) -> Option<TypeInfo>;

    fn is_static(&self) -> bool;

    fn get_target(&self) -> Result<Option<Instance>, AopError>;

    fn release_target(&self, _target: &Instance) -> Result<(), AopError> {
        Ok(())
    }

    /// The fixed target of a static source
    fn static_target(&self) -> Option<Instance> {
        None
    }

    fn describe(&self) -> String {
        match self.target_class() {
            Some(class) => format!("{} for target class [{}]", self.kind(), class),
            None => self.kind().to_string(),
        }
    }

    fn kind(&self) -> &str;
}

/// Whether two target sources stand for the same target
pub fn same_target_source(a: &Arc<dyn TargetSource>, b: &Arc<dyn TargetSource>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (a.static_target(), b.static_target()) {
        (Some(x), Some(y)) => x.ptr_eq(&y),
        (None, None) => {
            a.kind() == EmptyTargetSource::KIND
                && b.kind() == EmptyTargetSource::KIND
                && a.target_class() == b.target_class()
        }
        _ => false,
    }
}

/// Always returns the same target object
#[derive(Clone)]
pub struct SingletonTargetSource {
    target: Instance,
}

impl SingletonTargetSource {
    pub fn new(target: Instance) -> Self {
        Self { target }
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<TypeInfo> {
        Some(self.target.type_info().clone())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Instance>, AopError> {
        Ok(Some(self.target.clone()))
    }

    fn static_target(&self) -> Option<Instance> {
        Some(self.target.clone())
    }

    fn kind(&self) -> &str {
        "SingletonTargetSource"
    }
}

impl fmt::Debug for SingletonTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SingletonTargetSource({:?})", self.target)
    }
}

/// No target at all; the interceptors must answer every call
#[derive(Debug, Clone, Default)]
pub struct EmptyTargetSource {
    target_class: Option<TypeInfo>,
}

impl EmptyTargetSource {
    pub const KIND: &'static str = "EmptyTargetSource";

    pub fn new() -> Self {
        Self::default()
    }

    /// Empty source that still reports a target class for proxy type decisions
    pub fn for_class(target_class: TypeInfo) -> Self {
        Self {
            target_class: Some(target_class),
        }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<TypeInfo> {
        self.target_class.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Instance>, AopError> {
        Ok(None)
    }

    fn kind(&self) -> &str {
        Self::KIND
    }
}

/// Fresh prototype bean per call
pub struct PrototypeTargetSource {
    factory: Arc<BeanFactory>,
    target_bean_name: String,
}

impl PrototypeTargetSource {
    pub fn new(factory: Arc<BeanFactory>, target_bean_name: impl Into<String>) -> Result<Self, AopError> {
        let target_bean_name = target_bean_name.into();
        if !factory.is_prototype(&target_bean_name)? {
            return Err(AopError::config(format!(
                "Cannot use prototype-based TargetSource against non-prototype bean with name '{}': instances would not be independent",
                target_bean_name
            )));
        }
        Ok(Self {
            factory,
            target_bean_name,
        })
    }

    pub fn target_bean_name(&self) -> &str {
        &self.target_bean_name
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<TypeInfo> {
        self.factory.type_of(&self.target_bean_name)
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Instance>, AopError> {
        debug!(bean = %self.target_bean_name, "Creating new prototype target");
        self.factory
            .get_bean(&self.target_bean_name)
            .map(Some)
            .map_err(|err| {
                AopError::target_source(
                    format!("Could not obtain prototype target '{}'", self.target_bean_name),
                    Some(err),
                )
            })
    }

    fn release_target(&self, target: &Instance) -> Result<(), AopError> {
        self.factory.destroy_bean(&self.target_bean_name, target)?;
        Ok(())
    }

    fn kind(&self) -> &str {
        "PrototypeTargetSource"
    }
}

impl fmt::Debug for PrototypeTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrototypeTargetSource({})", self.target_bean_name)
    }
}

struct PoolState {
    idle: Vec<Instance>,
    active: usize,
}

/// Bounded pool of prototype targets shared between callers
pub struct PooledTargetSource {
    factory: Arc<BeanFactory>,
    target_bean_name: String,
    max_size: usize,
    max_wait: Option<Duration>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PooledTargetSource {
    pub const DEFAULT_MAX_SIZE: usize = 8;

    pub fn new(factory: Arc<BeanFactory>, target_bean_name: impl Into<String>) -> Result<Self, AopError> {
        let target_bean_name = target_bean_name.into();
        if !factory.is_prototype(&target_bean_name)? {
            return Err(AopError::config(format!(
                "Cannot use pooled TargetSource against non-prototype bean with name '{}': instances would not be independent",
                target_bean_name
            )));
        }
        Ok(Self {
            factory,
            target_bean_name,
            max_size: Self::DEFAULT_MAX_SIZE,
            max_wait: None,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
            }),
            available: Condvar::new(),
        })
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Fail with [`AopError::PoolExhausted`] after waiting this long for a free target
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Destroy every idle target
    pub fn destroy(&self) {
        let idle: Vec<Instance> = std::mem::take(&mut self.state.lock().idle);
        for target in &idle {
            if let Err(err) = self.factory.destroy_bean(&self.target_bean_name, target) {
                warn!(bean = %self.target_bean_name, error = %err, "Failed to destroy pooled target");
            }
        }
    }

    fn exhausted(&self) -> AopError {
        AopError::PoolExhausted {
            bean_name: self.target_bean_name.clone(),
            max_size: self.max_size,
        }
    }
}

impl TargetSource for PooledTargetSource {
    fn target_class(&self) -> Option<TypeInfo> {
        self.factory.type_of(&self.target_bean_name)
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Instance>, AopError> {
        let mut state = self.state.lock();
        loop {
            if let Some(target) = state.idle.pop() {
                state.active += 1;
                return Ok(Some(target));
            }
            if state.active < self.max_size {
                state.active += 1;
                drop(state);
                return match self.factory.get_bean(&self.target_bean_name) {
                    Ok(target) => Ok(Some(target)),
                    Err(err) => {
                        self.state.lock().active -= 1;
                        self.available.notify_one();
                        Err(AopError::target_source(
                            format!("Could not create pooled target '{}'", self.target_bean_name),
                            Some(err),
                        ))
                    }
                };
            }
            match self.max_wait {
                Some(wait) => {
                    if self.available.wait_for(&mut state, wait).timed_out()
                        && state.idle.is_empty()
                        && state.active >= self.max_size
                    {
                        return Err(self.exhausted());
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn release_target(&self, target: &Instance) -> Result<(), AopError> {
        let mut state = self.state.lock();
        if state.active == 0 {
            warn!(bean = %self.target_bean_name, "Released a target that was not borrowed from the pool");
            return Ok(());
        }
        state.active -= 1;
        state.idle.push(target.clone());
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn kind(&self) -> &str {
        "PooledTargetSource"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{BeanDefinition, ConstructorCandidate};

    fn factory_with_prototype() -> Arc<BeanFactory> {
        let factory = BeanFactory::new();
        let worker = TypeInfo::class("Worker").build();
        let ty = worker.clone();
        factory
            .register_bean_definition(
                "worker",
                BeanDefinition::new(worker)
                    .prototype()
                    .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new((), ty.clone())))),
            )
            .unwrap();
        factory
            .register_bean_definition(
                "shared",
                BeanDefinition::new(TypeInfo::class("Shared").build()),
            )
            .unwrap();
        factory
    }

    #[test]
    fn test_prototype_source_rejects_singletons() {
        let factory = factory_with_prototype();
        assert!(PrototypeTargetSource::new(factory.clone(), "shared").unwrap_err().is_config());

        let source = PrototypeTargetSource::new(factory, "worker").unwrap();
        let first = source.get_target().unwrap().unwrap();
        let second = source.get_target().unwrap().unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(!source.is_static());
        assert_eq!(source.target_class().unwrap().name(), "Worker");
    }

    #[test]
    fn test_pool_reuses_released_targets() {
        let pool = PooledTargetSource::new(factory_with_prototype(), "worker")
            .unwrap()
            .with_max_size(2);

        let first = pool.get_target().unwrap().unwrap();
        assert_eq!(pool.active_count(), 1);
        pool.release_target(&first).unwrap();
        assert_eq!(pool.idle_count(), 1);

        let again = pool.get_target().unwrap().unwrap();
        assert!(again.ptr_eq(&first));
    }

    #[test]
    fn test_pool_exhaustion_times_out() {
        let pool = PooledTargetSource::new(factory_with_prototype(), "worker")
            .unwrap()
            .with_max_size(1)
            .with_max_wait(Duration::from_millis(20));

        let _held = pool.get_target().unwrap().unwrap();
        let err = pool.get_target().unwrap_err();
        assert!(matches!(err, AopError::PoolExhausted { max_size: 1, .. }));
    }
}
