//! Custom target sources chosen before a bean is instantiated.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use trellis_core::{BeanFactory, TypeInfo};
use uuid::Uuid;

use crate::error::AopError;
use crate::pointcut::simple_match;
use crate::target::{PooledTargetSource, PrototypeTargetSource, TargetSource};

/// Offers a custom target source for a bean, bypassing its normal instantiation
pub trait TargetSourceCreator: Send + Sync {
    fn target_source(
        &self,
        factory: &Arc<BeanFactory>,
        bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Arc<dyn TargetSource>>, AopError>;
}

/// Child factories holding prototype copies of the original definitions.
///
/// Targets come from these so that the auto-proxy creator registered on the
/// outer factory does not proxy them a second time.
#[derive(Default)]
struct InternalFactories {
    factories: DashMap<Uuid, Arc<BeanFactory>>,
}

impl InternalFactories {
    fn prepare(&self, factory: &Arc<BeanFactory>, bean_name: &str) -> Result<Option<Arc<BeanFactory>>, AopError> {
        let definition = match factory.bean_definition(bean_name) {
            Some(definition) => definition,
            None => return Ok(None),
        };
        let internal = self
            .factories
            .entry(factory.id())
            .or_insert_with(|| BeanFactory::with_parent(factory.clone(), factory.config().clone()))
            .clone();
        if !internal.contains_bean_definition(bean_name) {
            debug!("Copying definition of bean '{}' into internal prototype factory", bean_name);
            internal.register_bean_definition(bean_name, definition.clone_definition().prototype())?;
        }
        Ok(Some(internal))
    }
}

fn matches_any(patterns: &[String], bean_name: &str) -> bool {
    patterns.iter().any(|pattern| simple_match(pattern, bean_name))
}

/// A fresh target per call for beans matching the patterns
#[derive(Default)]
pub struct PrototypeTargetSourceCreator {
    patterns: Vec<String>,
    internal: InternalFactories,
}

impl PrototypeTargetSourceCreator {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            internal: InternalFactories::default(),
        }
    }
}

impl TargetSourceCreator for PrototypeTargetSourceCreator {
    fn target_source(
        &self,
        factory: &Arc<BeanFactory>,
        _bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Arc<dyn TargetSource>>, AopError> {
        if !matches_any(&self.patterns, bean_name) {
            return Ok(None);
        }
        match self.internal.prepare(factory, bean_name)? {
            Some(internal) => Ok(Some(Arc::new(PrototypeTargetSource::new(internal, bean_name)?))),
            None => Ok(None),
        }
    }
}

/// A bounded pool of targets for beans matching the patterns
pub struct PooledTargetSourceCreator {
    patterns: Vec<String>,
    max_size: usize,
    max_wait: Option<Duration>,
    internal: InternalFactories,
}

impl PooledTargetSourceCreator {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            max_size: PooledTargetSource::DEFAULT_MAX_SIZE,
            max_wait: None,
            internal: InternalFactories::default(),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

impl TargetSourceCreator for PooledTargetSourceCreator {
    fn target_source(
        &self,
        factory: &Arc<BeanFactory>,
        _bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Arc<dyn TargetSource>>, AopError> {
        if !matches_any(&self.patterns, bean_name) {
            return Ok(None);
        }
        let internal = match self.internal.prepare(factory, bean_name)? {
            Some(internal) => internal,
            None => return Ok(None),
        };
        let mut pool = PooledTargetSource::new(internal, bean_name)?.with_max_size(self.max_size);
        if let Some(wait) = self.max_wait {
            pool = pool.with_max_wait(wait);
        }
        Ok(Some(Arc::new(pool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{BeanDefinition, ConstructorCandidate, Instance};

    #[test]
    fn test_prototype_creator_copies_singleton_definition() {
        let factory = BeanFactory::new();
        let ty = TypeInfo::class("Counter").build();
        let ctor_ty = ty.clone();
        factory
            .register_bean_definition(
                "counter",
                BeanDefinition::new(ty.clone())
                    .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new(0u32, ctor_ty.clone())))),
            )
            .unwrap();

        let creator = PrototypeTargetSourceCreator::new(["count*"]);
        let source = creator.target_source(&factory, &ty, "counter").unwrap().unwrap();
        assert!(!source.is_static());
        let first = source.get_target().unwrap().unwrap();
        let second = source.get_target().unwrap().unwrap();
        assert!(!first.ptr_eq(&second));

        assert!(creator.target_source(&factory, &ty, "other").unwrap().is_none());
    }
}
