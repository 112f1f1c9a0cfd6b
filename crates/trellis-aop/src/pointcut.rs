//! Pointcuts: which classes and which methods an advisor applies to.

use std::fmt;
use std::sync::Arc;

use trellis_core::{Instance, Method, TypeInfo};

/// Restricts a pointcut to a set of target classes
pub trait ClassFilter: Send + Sync {
    fn matches(&self, target_class: &TypeInfo) -> bool;
}

/// Decides whether a method is advised.
///
/// Static matchers answer from the method and target class alone and the
/// answer is cached per method. Runtime matchers (`is_runtime() == true`) are
/// asked again on every call with the actual arguments, after the static check
/// passed.
pub trait MethodMatcher: Send + Sync {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool;

    fn is_runtime(&self) -> bool {
        false
    }

    fn matches_runtime(&self, method: &Method, target_class: &TypeInfo, _args: &[Instance]) -> bool {
        self.matches(method, target_class)
    }

    /// Whether this matcher wants to know about introductions on the proxy
    fn is_introduction_aware(&self) -> bool {
        false
    }

    fn matches_with_introductions(&self, method: &Method, target_class: &TypeInfo, _has_introductions: bool) -> bool {
        self.matches(method, target_class)
    }
}

pub trait Pointcut: Send + Sync {
    fn class_filter(&self) -> Arc<dyn ClassFilter>;
    fn method_matcher(&self) -> Arc<dyn MethodMatcher>;
}

/// Matches every class
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueClassFilter;

impl ClassFilter for TrueClassFilter {
    fn matches(&self, _target_class: &TypeInfo) -> bool {
        true
    }
}

/// Matches a class and all of its subtypes
#[derive(Debug, Clone)]
pub struct RootClassFilter {
    root: TypeInfo,
}

impl RootClassFilter {
    pub fn new(root: TypeInfo) -> Self {
        Self { root }
    }
}

impl ClassFilter for RootClassFilter {
    fn matches(&self, target_class: &TypeInfo) -> bool {
        self.root.is_assignable_from(target_class)
    }
}

/// Matches every method
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueMethodMatcher;

impl MethodMatcher for TrueMethodMatcher {
    fn matches(&self, _method: &Method, _target_class: &TypeInfo) -> bool {
        true
    }
}

/// Pointcut matching every method of every class
#[derive(Debug, Clone, Copy, Default)]
pub struct TruePointcut;

impl Pointcut for TruePointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        Arc::new(TrueClassFilter)
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        Arc::new(TrueMethodMatcher)
    }
}

/// Match `text` against a pattern supporting `*` wildcards (`get*`, `*Service`, `*repo*`)
pub fn simple_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return false,
    };
    if !text.starts_with(first) {
        return false;
    }
    let mut remaining = &text[first.len()..];
    let last_index = rest.len().saturating_sub(1);
    for (i, part) in rest.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == last_index {
            return remaining.ends_with(part);
        }
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Matches methods by name, with `*` wildcards
#[derive(Debug, Clone, Default)]
pub struct NameMatchMethodMatcher {
    mapped_names: Vec<String>,
}

impl NameMatchMethodMatcher {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mapped_names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn mapped_names(&self) -> &[String] {
        &self.mapped_names
    }
}

impl MethodMatcher for NameMatchMethodMatcher {
    fn matches(&self, method: &Method, _target_class: &TypeInfo) -> bool {
        self.mapped_names
            .iter()
            .any(|pattern| pattern == method.name() || simple_match(pattern, method.name()))
    }
}

/// Pointcut selecting methods by name
#[derive(Clone)]
pub struct NameMatchMethodPointcut {
    matcher: Arc<NameMatchMethodMatcher>,
    class_filter: Arc<dyn ClassFilter>,
}

impl NameMatchMethodPointcut {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: Arc::new(NameMatchMethodMatcher::new(names)),
            class_filter: Arc::new(TrueClassFilter),
        }
    }

    pub fn with_class_filter(mut self, class_filter: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = class_filter;
        self
    }

    pub fn mapped_names(&self) -> &[String] {
        self.matcher.mapped_names()
    }
}

impl Pointcut for NameMatchMethodPointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        self.class_filter.clone()
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        self.matcher.clone()
    }
}

impl fmt::Debug for NameMatchMethodPointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameMatchMethodPointcut")
            .field("mapped_names", &self.matcher.mapped_names)
            .finish()
    }
}

type StaticCheck = dyn Fn(&Method, &TypeInfo) -> bool + Send + Sync;
type RuntimeCheck = dyn Fn(&Method, &TypeInfo, &[Instance]) -> bool + Send + Sync;

/// Runtime matcher backed by closures
pub struct DynamicMethodMatcher {
    static_check: Option<Box<StaticCheck>>,
    runtime_check: Box<RuntimeCheck>,
}

impl DynamicMethodMatcher {
    pub fn new<F>(runtime_check: F) -> Self
    where
        F: Fn(&Method, &TypeInfo, &[Instance]) -> bool + Send + Sync + 'static,
    {
        Self {
            static_check: None,
            runtime_check: Box::new(runtime_check),
        }
    }

    /// Narrow the candidate methods before any call happens
    pub fn with_static_check<F>(mut self, static_check: F) -> Self
    where
        F: Fn(&Method, &TypeInfo) -> bool + Send + Sync + 'static,
    {
        self.static_check = Some(Box::new(static_check));
        self
    }
}

impl MethodMatcher for DynamicMethodMatcher {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        self.static_check
            .as_ref()
            .map(|check| check(method, target_class))
            .unwrap_or(true)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_runtime(&self, method: &Method, target_class: &TypeInfo, args: &[Instance]) -> bool {
        (self.runtime_check)(method, target_class, args)
    }
}

/// Pointcut whose method matcher is a [`DynamicMethodMatcher`]
pub struct DynamicMethodMatcherPointcut {
    matcher: Arc<DynamicMethodMatcher>,
    class_filter: Arc<dyn ClassFilter>,
}

impl DynamicMethodMatcherPointcut {
    pub fn new(matcher: DynamicMethodMatcher) -> Self {
        Self {
            matcher: Arc::new(matcher),
            class_filter: Arc::new(TrueClassFilter),
        }
    }

    pub fn with_class_filter(mut self, class_filter: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = class_filter;
        self
    }
}

impl Pointcut for DynamicMethodMatcherPointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        self.class_filter.clone()
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        self.matcher.clone()
    }
}

struct UnionClassFilter(Vec<Arc<dyn ClassFilter>>);

impl ClassFilter for UnionClassFilter {
    fn matches(&self, target_class: &TypeInfo) -> bool {
        self.0.iter().any(|f| f.matches(target_class))
    }
}

struct IntersectionClassFilter(Vec<Arc<dyn ClassFilter>>);

impl ClassFilter for IntersectionClassFilter {
    fn matches(&self, target_class: &TypeInfo) -> bool {
        self.0.iter().all(|f| f.matches(target_class))
    }
}

/// One side of a union; the class filter keeps each side's matcher from
/// answering for classes its own pointcut excludes
struct UnionMember {
    matcher: Arc<dyn MethodMatcher>,
    class_filter: Option<Arc<dyn ClassFilter>>,
}

impl UnionMember {
    fn class_matches(&self, target_class: &TypeInfo) -> bool {
        self.class_filter
            .as_ref()
            .map(|f| f.matches(target_class))
            .unwrap_or(true)
    }
}

struct UnionMethodMatcher {
    left: UnionMember,
    right: UnionMember,
}

impl MethodMatcher for UnionMethodMatcher {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        [&self.left, &self.right]
            .iter()
            .any(|m| m.class_matches(target_class) && m.matcher.matches(method, target_class))
    }

    fn is_runtime(&self) -> bool {
        self.left.matcher.is_runtime() || self.right.matcher.is_runtime()
    }

    fn matches_runtime(&self, method: &Method, target_class: &TypeInfo, args: &[Instance]) -> bool {
        [&self.left, &self.right].iter().any(|m| {
            m.class_matches(target_class)
                && m.matcher.matches(method, target_class)
                && (!m.matcher.is_runtime() || m.matcher.matches_runtime(method, target_class, args))
        })
    }

    fn is_introduction_aware(&self) -> bool {
        self.left.matcher.is_introduction_aware() || self.right.matcher.is_introduction_aware()
    }

    fn matches_with_introductions(&self, method: &Method, target_class: &TypeInfo, has_introductions: bool) -> bool {
        [&self.left, &self.right].iter().any(|m| {
            m.class_matches(target_class)
                && m.matcher
                    .matches_with_introductions(method, target_class, has_introductions)
        })
    }
}

struct IntersectionMethodMatcher {
    left: Arc<dyn MethodMatcher>,
    right: Arc<dyn MethodMatcher>,
}

impl MethodMatcher for IntersectionMethodMatcher {
    fn matches(&self, method: &Method, target_class: &TypeInfo) -> bool {
        self.left.matches(method, target_class) && self.right.matches(method, target_class)
    }

    fn is_runtime(&self) -> bool {
        self.left.is_runtime() || self.right.is_runtime()
    }

    fn matches_runtime(&self, method: &Method, target_class: &TypeInfo, args: &[Instance]) -> bool {
        let check = |m: &Arc<dyn MethodMatcher>| {
            if m.is_runtime() {
                m.matches_runtime(method, target_class, args)
            } else {
                m.matches(method, target_class)
            }
        };
        check(&self.left) && check(&self.right)
    }

    fn is_introduction_aware(&self) -> bool {
        self.left.is_introduction_aware() || self.right.is_introduction_aware()
    }

    fn matches_with_introductions(&self, method: &Method, target_class: &TypeInfo, has_introductions: bool) -> bool {
        self.left
            .matches_with_introductions(method, target_class, has_introductions)
            && self
                .right
                .matches_with_introductions(method, target_class, has_introductions)
    }
}

/// Pointcut built by combining other pointcuts, class filters and method matchers
#[derive(Clone)]
pub struct ComposablePointcut {
    class_filter: Arc<dyn ClassFilter>,
    method_matcher: Arc<dyn MethodMatcher>,
}

impl Default for ComposablePointcut {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposablePointcut {
    /// Starts out matching everything
    pub fn new() -> Self {
        Self {
            class_filter: Arc::new(TrueClassFilter),
            method_matcher: Arc::new(TrueMethodMatcher),
        }
    }

    pub fn from_pointcut(pointcut: &dyn Pointcut) -> Self {
        Self {
            class_filter: pointcut.class_filter(),
            method_matcher: pointcut.method_matcher(),
        }
    }

    pub fn from_parts(class_filter: Arc<dyn ClassFilter>, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Self {
            class_filter,
            method_matcher,
        }
    }

    pub fn union_class_filter(mut self, other: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = Arc::new(UnionClassFilter(vec![self.class_filter, other]));
        self
    }

    pub fn intersection_class_filter(mut self, other: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = Arc::new(IntersectionClassFilter(vec![self.class_filter, other]));
        self
    }

    pub fn union_method_matcher(mut self, other: Arc<dyn MethodMatcher>) -> Self {
        self.method_matcher = Arc::new(UnionMethodMatcher {
            left: UnionMember {
                matcher: self.method_matcher,
                class_filter: None,
            },
            right: UnionMember {
                matcher: other,
                class_filter: None,
            },
        });
        self
    }

    pub fn intersection_method_matcher(mut self, other: Arc<dyn MethodMatcher>) -> Self {
        self.method_matcher = Arc::new(IntersectionMethodMatcher {
            left: self.method_matcher,
            right: other,
        });
        self
    }

    /// Matches where either pointcut matches, each within its own class filter
    pub fn union(self, other: &dyn Pointcut) -> Self {
        let other_filter = other.class_filter();
        let method_matcher: Arc<dyn MethodMatcher> = Arc::new(UnionMethodMatcher {
            left: UnionMember {
                matcher: self.method_matcher,
                class_filter: Some(self.class_filter.clone()),
            },
            right: UnionMember {
                matcher: other.method_matcher(),
                class_filter: Some(other_filter.clone()),
            },
        });
        Self {
            class_filter: Arc::new(UnionClassFilter(vec![self.class_filter, other_filter])),
            method_matcher,
        }
    }

    /// Matches where both pointcuts match
    pub fn intersection(self, other: &dyn Pointcut) -> Self {
        Self {
            class_filter: Arc::new(IntersectionClassFilter(vec![self.class_filter, other.class_filter()])),
            method_matcher: Arc::new(IntersectionMethodMatcher {
                left: self.method_matcher,
                right: other.method_matcher(),
            }),
        }
    }
}

impl Pointcut for ComposablePointcut {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        self.class_filter.clone()
    }

    fn method_matcher(&self) -> Arc<dyn MethodMatcher> {
        self.method_matcher.clone()
    }
}
