//! Declarative transactions: method interception driven by attribute sources.

use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};
use trellis_aop::pointcut::{simple_match, ClassFilter, MethodMatcher, Pointcut};
use trellis_aop::support::is_infrastructure_class;
use trellis_aop::{Advice, MethodInterceptor, MethodInvocation, PointcutAdvisor, LOWEST_PRECEDENCE};
use trellis_core::{InvocationError, InvocationResult, Method, TypeInfo};

use crate::definition::{DefaultTransactionDefinition, Isolation, Propagation, TransactionDefinition};
use crate::error::TransactionError;
use crate::manager::PlatformTransactionManager;
use crate::status::TransactionStatus;

/// Transaction definition plus the decision which errors roll back
pub trait TransactionAttribute: TransactionDefinition {
    /// Unchecked errors roll back, checked errors commit
    fn rollback_on(&self, error: &InvocationError) -> bool {
        error.is_unchecked()
    }
}

/// Rule matching errors whose type name contains a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackRule {
    Rollback(String),
    NoRollback(String),
}

impl RollbackRule {
    pub fn pattern(&self) -> &str {
        match self {
            Self::Rollback(pattern) | Self::NoRollback(pattern) => pattern,
        }
    }

    pub fn matches(&self, error: &InvocationError) -> bool {
        error.type_name().contains(self.pattern())
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback(_))
    }
}

/// Attribute with explicit rollback rules; the first matching rule wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleBasedTransactionAttribute {
    definition: DefaultTransactionDefinition,
    rules: Vec<RollbackRule>,
}

impl RuleBasedTransactionAttribute {
    pub fn new(definition: DefaultTransactionDefinition) -> Self {
        Self {
            definition,
            rules: Vec::new(),
        }
    }

    pub fn for_propagation(propagation: Propagation) -> Self {
        Self::new(DefaultTransactionDefinition::for_propagation(propagation))
    }

    pub fn rollback_for(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(RollbackRule::Rollback(pattern.into()));
        self
    }

    pub fn no_rollback_for(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(RollbackRule::NoRollback(pattern.into()));
        self
    }

    pub fn definition(&self) -> &DefaultTransactionDefinition {
        &self.definition
    }

    pub fn rules(&self) -> &[RollbackRule] {
        &self.rules
    }
}

impl TransactionDefinition for RuleBasedTransactionAttribute {
    fn propagation(&self) -> Propagation {
        self.definition.propagation
    }

    fn isolation(&self) -> Isolation {
        self.definition.isolation
    }

    fn timeout(&self) -> i32 {
        self.definition.timeout
    }

    fn is_read_only(&self) -> bool {
        self.definition.read_only
    }

    fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }
}

impl TransactionAttribute for RuleBasedTransactionAttribute {
    fn rollback_on(&self, error: &InvocationError) -> bool {
        match self.rules.iter().find(|rule| rule.matches(error)) {
            Some(rule) => rule.is_rollback(),
            None => error.is_unchecked(),
        }
    }
}

/// Parses the compact form `PROPAGATION_REQUIRED,ISOLATION_SERIALIZABLE,timeout_5,readOnly,-Fatal,+Benign`
impl FromStr for RuleBasedTransactionAttribute {
    type Err = TransactionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut attribute = Self::default();
        for token in text.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            if let Some(pattern) = token.strip_prefix('-') {
                attribute.rules.push(RollbackRule::Rollback(pattern.to_string()));
            } else if let Some(pattern) = token.strip_prefix('+') {
                attribute.rules.push(RollbackRule::NoRollback(pattern.to_string()));
            } else if token == "readOnly" {
                attribute.definition.read_only = true;
            } else if let Some(seconds) = token.strip_prefix("timeout_") {
                let seconds = seconds
                    .parse::<i32>()
                    .map_err(|_| TransactionError::usage(format!("Invalid timeout in transaction attribute: [{}]", token)))?;
                attribute.definition = attribute.definition.with_timeout(seconds)?;
            } else if let Some(propagation) = (0..7)
                .filter_map(Propagation::from_code)
                .find(|propagation| propagation.as_str() == token)
            {
                attribute.definition.propagation = propagation;
            } else if let Some(isolation) = [-1, 1, 2, 4, 8]
                .into_iter()
                .filter_map(Isolation::from_code)
                .find(|isolation| isolation.as_str() == token)
            {
                attribute.definition.isolation = isolation;
            } else {
                return Err(TransactionError::usage(format!(
                    "Invalid transaction attribute token: [{}]",
                    token
                )));
            }
        }
        Ok(attribute)
    }
}

impl fmt::Display for RuleBasedTransactionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())?;
        for rule in &self.rules {
            let sign = if rule.is_rollback() { '-' } else { '+' };
            write!(f, ",{}{}", sign, rule.pattern())?;
        }
        Ok(())
    }
}

/// Attribute carrying the transaction name, the intercepted method's when none is configured
struct NamedAttribute {
    inner: Arc<dyn TransactionAttribute>,
    name: String,
}

impl TransactionDefinition for NamedAttribute {
    fn propagation(&self) -> Propagation {
        self.inner.propagation()
    }

    fn isolation(&self) -> Isolation {
        self.inner.isolation()
    }

    fn timeout(&self) -> i32 {
        self.inner.timeout()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl TransactionAttribute for NamedAttribute {
    fn rollback_on(&self, error: &InvocationError) -> bool {
        self.inner.rollback_on(error)
    }
}

/// Looks up the transaction attribute of a method
pub trait TransactionAttributeSource: Send + Sync {
    /// `None` when the method is not transactional
    fn transaction_attribute(&self, method: &Method, target_class: Option<&TypeInfo>)
        -> Option<Arc<dyn TransactionAttribute>>;

    /// Whether any method of `target_class` may be transactional
    fn is_candidate_class(&self, _target_class: &TypeInfo) -> bool {
        true
    }
}

/// Attributes keyed by method name patterns (`save*`, `*Report`, `load`).
///
/// An exact name wins over patterns; among patterns the longest match wins.
#[derive(Default)]
pub struct NameMatchTransactionAttributeSource {
    attributes: RwLock<Vec<(String, Arc<dyn TransactionAttribute>)>>,
}

impl NameMatchTransactionAttributeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method(&self, pattern: impl Into<String>, attribute: Arc<dyn TransactionAttribute>) {
        let pattern = pattern.into();
        trace!("Adding transactional method [{}]", pattern);
        let mut attributes = self.attributes.write();
        attributes.retain(|(existing, _)| *existing != pattern);
        attributes.push((pattern, attribute));
    }

    /// Register attributes from their compact text form
    pub fn with_properties<'a, I>(entries: I) -> Result<Self, TransactionError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let source = Self::new();
        for (pattern, text) in entries {
            source.add_method(pattern, Arc::new(text.parse::<RuleBasedTransactionAttribute>()?));
        }
        Ok(source)
    }
}

impl TransactionAttributeSource for NameMatchTransactionAttributeSource {
    fn transaction_attribute(
        &self,
        method: &Method,
        _target_class: Option<&TypeInfo>,
    ) -> Option<Arc<dyn TransactionAttribute>> {
        let attributes = self.attributes.read();
        if let Some((_, attribute)) = attributes.iter().find(|(pattern, _)| pattern == method.name()) {
            return Some(attribute.clone());
        }
        let mut best: Option<&(String, Arc<dyn TransactionAttribute>)> = None;
        for entry in attributes.iter() {
            if simple_match(&entry.0, method.name()) && best.map(|(name, _)| name.len() <= entry.0.len()).unwrap_or(true) {
                best = Some(entry);
            }
        }
        best.map(|(_, attribute)| attribute.clone())
    }
}

struct TransactionInfo {
    status: Option<TransactionStatus>,
}

thread_local! {
    static TRANSACTION_INFO: RefCell<Vec<TransactionInfo>> = const { RefCell::new(Vec::new()) };
}

/// Binds a transaction info to the thread for the duration of an intercepted call
struct TransactionInfoScope;

impl TransactionInfoScope {
    fn enter(status: Option<TransactionStatus>) -> Self {
        TRANSACTION_INFO.with(|stack| stack.borrow_mut().push(TransactionInfo { status }));
        Self
    }
}

impl Drop for TransactionInfoScope {
    fn drop(&mut self) {
        TRANSACTION_INFO.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Status of the transaction driving the innermost intercepted call on this thread
pub fn current_transaction_status() -> Result<TransactionStatus, TransactionError> {
    TRANSACTION_INFO
        .with(|stack| stack.borrow().last().and_then(|info| info.status.clone()))
        .ok_or(TransactionError::NoTransaction)
}

fn joinpoint_identification(method: &Method, target_class: Option<&TypeInfo>) -> String {
    let owner = target_class.map(TypeInfo::name).unwrap_or_else(|| method.declaring_type());
    format!("{}.{}", owner, method.name())
}

/// Runs intercepted calls inside transactions described by an attribute source
pub struct TransactionInterceptor {
    manager: Arc<dyn PlatformTransactionManager>,
    source: Arc<dyn TransactionAttributeSource>,
}

impl TransactionInterceptor {
    pub fn new(manager: Arc<dyn PlatformTransactionManager>, source: Arc<dyn TransactionAttributeSource>) -> Self {
        Self { manager, source }
    }

    pub fn attribute_source(&self) -> &Arc<dyn TransactionAttributeSource> {
        &self.source
    }

    pub fn transaction_manager(&self) -> &Arc<dyn PlatformTransactionManager> {
        &self.manager
    }

    fn complete_after_throwing(
        &self,
        joinpoint: &str,
        status: &TransactionStatus,
        attribute: &dyn TransactionAttribute,
        err: InvocationError,
    ) -> InvocationError {
        trace!("Completing transaction for [{}] after exception: {}", joinpoint, err);
        if attribute.rollback_on(&err) {
            if let Err(rollback_error) = self.manager.rollback(status) {
                error!("Application exception overridden by rollback exception: {}", err);
                return rollback_error.into();
            }
        } else if let Err(commit_error) = self.manager.commit(status) {
            error!("Application exception overridden by commit exception: {}", err);
            return commit_error.into();
        }
        err
    }
}

impl MethodInterceptor for TransactionInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let target_class = invocation.target_class().cloned();
        let joinpoint = joinpoint_identification(invocation.method(), target_class.as_ref());
        let attribute = self
            .source
            .transaction_attribute(invocation.method(), target_class.as_ref())
            .map(|inner| NamedAttribute {
                name: inner.name().map(str::to_string).unwrap_or_else(|| joinpoint.clone()),
                inner,
            });

        let status = match &attribute {
            Some(attribute) => {
                trace!("Getting transaction for [{}]", attribute.name);
                Some(self.manager.get_transaction(attribute)?)
            }
            None => {
                trace!("No need to create transaction for [{}]: not transactional", joinpoint);
                None
            }
        };

        let result = {
            let _scope = TransactionInfoScope::enter(status.clone());
            match invocation.proceed() {
                Ok(value) => Ok(value),
                Err(err) => Err(match (&status, &attribute) {
                    (Some(status), Some(attribute)) => {
                        self.complete_after_throwing(&joinpoint, status, attribute, err)
                    }
                    _ => err,
                }),
            }
        };

        let value = result?;
        if let Some(status) = &status {
            trace!("Completing transaction for [{}]", joinpoint);
            self.manager.commit(status)?;
        }
        Ok(value)
    }

    fn name(&self) -> &str {
        "TransactionInterceptor"
    }
}

struct SourceClassFilter {
    source: Arc<dyn TransactionAttributeSource>,
}

impl ClassFilter for SourceClassFilter {
    fn matches(&self, target_class: &TypeInfo) -> bool {
        !is_infrastructure_class(target_class) && self.source.is_candidate_class(target_class)
    }
}

struct SourceMethodMatcher {
    source: Arc<dyn TransactionAttributeSource>,
}

impl MethodMatcher for SourceMethodMatcher {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        self.source.transaction_attribute(method, Some(target_class)).is_some()
    }
}

/// Pointcut matching methods that have a transaction attribute
pub struct TransactionAttributeSourcePointcut {
    source: Arc<dyn TransactionAttributeSource>,
}

impl TransactionAttributeSourcePointcut {
    pub fn new(source: Arc<dyn TransactionAttributeSource>) -> Self {
        Self { source }
    }
}

impl Pointcut for TransactionAttributeSourcePointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        Arc::new(SourceClassFilter {
            source: self.source.clone(),
        })
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        Arc::new(SourceMethodMatcher {
            source: self.source.clone(),
        })
    }
}

/// Advisor applying a [`TransactionInterceptor`] to transactional methods
pub struct TransactionAttributeSourceAdvisor {
    interceptor: Arc<TransactionInterceptor>,
    pointcut: Arc<TransactionAttributeSourcePointcut>,
    order: i32,
}

impl TransactionAttributeSourceAdvisor {
    pub fn new(interceptor: TransactionInterceptor) -> Self {
        let pointcut = Arc::new(TransactionAttributeSourcePointcut::new(interceptor.source.clone()));
        Self {
            interceptor: Arc::new(interceptor),
            pointcut,
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Wrap into the advisor form proxies and auto-proxy creators accept
    pub fn into_advisor(self) -> trellis_aop::Advisor {
        trellis_aop::Advisor::Pointcut(Arc::new(self))
    }
}

impl PointcutAdvisor for TransactionAttributeSourceAdvisor {
    fn pointcut(&self) -> Arc<dyn Pointcut> {
        self.pointcut.clone()
    }

    fn advice(&self) -> Advice {
        Advice::Interceptor(self.interceptor.clone())
    }

    fn order(&self) -> i32 {
        self.order
    }
}
