//! Strategies deciding which advisors an auto-proxied bean receives.

use std::sync::Arc;

use tracing::{debug, trace};
use trellis_core::{BeanFactory, TypeInfo};

use crate::advisor::{find_advisors_that_can_apply, sort_advisors, Advisor};
use crate::error::AopError;
use crate::pointcut::simple_match;
use crate::support::advisor_type;

/// Picks the bean-specific advisors for a bean.
///
/// `Ok(None)` means "do not proxy"; `Ok(Some(vec![]))` means "proxy, but with
/// the common interceptors only".
pub trait AdvisorSelector: Send + Sync {
    fn advisors_for_bean(
        &self,
        factory: &Arc<BeanFactory>,
        bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Vec<Advisor>>, AopError>;

    /// Whether returned advisors were already matched against the bean class
    fn is_pre_filtered(&self) -> bool {
        false
    }
}

/// Proxies beans whose name (or an alias) matches one of the patterns.
///
/// Patterns support `*` wildcards: `"*Service"`, `"order*"`, `"*Repo*"`.
#[derive(Debug, Clone)]
pub struct BeanNameSelector {
    patterns: Vec<String>,
}

impl BeanNameSelector {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(|p| p.into().trim().to_string()).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    fn is_match(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| simple_match(pattern, name))
    }
}

impl AdvisorSelector for BeanNameSelector {
    fn advisors_for_bean(
        &self,
        factory: &Arc<BeanFactory>,
        _bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Vec<Advisor>>, AopError> {
        if self.is_match(bean_name) || factory.aliases(bean_name).iter().any(|alias| self.is_match(alias)) {
            return Ok(Some(Vec::new()));
        }
        Ok(None)
    }
}

/// Applies every advisor bean in the factory whose pointcut can match the bean class
#[derive(Debug, Clone, Default)]
pub struct FactoryAdvisorSelector {
    name_prefix: Option<String>,
}

impl FactoryAdvisorSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only consider advisor beans whose name starts with `prefix`
    pub fn with_name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
        }
    }

    fn is_eligible_advisor_bean(&self, bean_name: &str) -> bool {
        match &self.name_prefix {
            Some(prefix) => bean_name.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Every advisor bean of the factory that can currently be obtained
    pub fn candidate_advisors(&self, factory: &Arc<BeanFactory>) -> Result<Vec<Advisor>, AopError> {
        let mut advisors = Vec::new();
        for name in factory.bean_names_for_type(&advisor_type()) {
            if !self.is_eligible_advisor_bean(&name) {
                continue;
            }
            if factory.is_currently_in_creation(&name) {
                trace!("Skipping currently created advisor '{}'", name);
                continue;
            }
            let bean = match factory.get_bean(&name) {
                Ok(bean) => bean,
                Err(err) if err.is_circular_reference() => {
                    debug!("Skipping advisor '{}' with dependency on currently created bean: {}", name, err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match bean.downcast_ref::<Advisor>() {
                Some(advisor) => advisors.push(advisor.clone()),
                None => debug!("Bean '{}' is typed as an advisor but holds [{}]", name, bean.type_info()),
            }
        }
        Ok(advisors)
    }
}

impl AdvisorSelector for FactoryAdvisorSelector {
    fn advisors_for_bean(
        &self,
        factory: &Arc<BeanFactory>,
        bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Vec<Advisor>>, AopError> {
        let candidates = self.candidate_advisors(factory)?;
        let mut eligible = find_advisors_that_can_apply(&candidates, bean_type);
        if eligible.is_empty() {
            return Ok(None);
        }
        sort_advisors(&mut eligible);
        trace!("{} advisor(s) apply to bean '{}'", eligible.len(), bean_name);
        Ok(Some(eligible))
    }

    fn is_pre_filtered(&self) -> bool {
        true
    }
}
