use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::container::alias::AliasRegistry;
use crate::container::dependents::DependencyGraph;
use crate::container::lifecycle::DisposableBean;
use crate::errors::CoreError;
use crate::types::Instance;

/// Produces the early reference for a singleton that is still being created
pub type SingletonFactory = Arc<dyn Fn() -> Result<Instance, CoreError> + Send + Sync>;

const DEFAULT_SUPPRESSED_LIMIT: usize = 100;

/// Shared-instance registry with three-level caching.
///
/// Fully initialised singletons live in `singleton_objects` and are read
/// without taking the creation monitor. Singletons still being created can be
/// handed out early, either from `early_singleton_objects` or by running the
/// registered `singleton_factories` entry once, which is what lets setter
/// cycles between singletons resolve.
pub struct SingletonRegistry {
    /// Serialises creation; re-entrant because creating one singleton creates its dependencies
    monitor: ReentrantMutex<()>,
    singleton_objects: DashMap<String, Instance>,
    early_singleton_objects: DashMap<String, Instance>,
    singleton_factories: Mutex<HashMap<String, SingletonFactory>>,
    registered_singletons: Mutex<Vec<String>>,
    singletons_currently_in_creation: DashSet<String>,
    in_creation_check_exclusions: DashSet<String>,
    suppressed_errors: Mutex<Option<Vec<CoreError>>>,
    suppressed_limit: usize,
    singletons_currently_in_destruction: AtomicBool,
    disposable_beans: Mutex<Vec<(String, Arc<dyn DisposableBean>)>>,
    contained_beans: Mutex<HashMap<String, Vec<String>>>,
    dependencies: DependencyGraph,
    aliases: AliasRegistry,
}

impl SingletonRegistry {
    /// Create a new singleton registry
    pub fn new() -> Self {
        Self::with_suppressed_limit(DEFAULT_SUPPRESSED_LIMIT)
    }

    /// Create a registry recording at most `limit` suppressed errors per creation
    pub fn with_suppressed_limit(limit: usize) -> Self {
        Self {
            monitor: ReentrantMutex::new(()),
            singleton_objects: DashMap::new(),
            early_singleton_objects: DashMap::new(),
            singleton_factories: Mutex::new(HashMap::new()),
            registered_singletons: Mutex::new(Vec::new()),
            singletons_currently_in_creation: DashSet::new(),
            in_creation_check_exclusions: DashSet::new(),
            suppressed_errors: Mutex::new(None),
            suppressed_limit: limit,
            singletons_currently_in_destruction: AtomicBool::new(false),
            disposable_beans: Mutex::new(Vec::new()),
            contained_beans: Mutex::new(HashMap::new()),
            dependencies: DependencyGraph::new(),
            aliases: AliasRegistry::new(true),
        }
    }

    /// Register a fully initialised object under `bean_name`
    pub fn register_singleton(&self, bean_name: &str, instance: Instance) -> Result<(), CoreError> {
        let _guard = self.monitor.lock();
        let existing = self.singleton_objects.get(bean_name).map(|e| e.value().clone());
        if let Some(existing) = existing {
            return Err(CoreError::DuplicateSingleton {
                bean_name: bean_name.to_string(),
                instance: format!("{:?}", instance),
                existing: format!("{:?}", existing),
            });
        }
        self.add_singleton(bean_name, instance);
        Ok(())
    }

    /// Move a singleton into the final cache and drop its early forms
    pub fn add_singleton(&self, bean_name: &str, instance: Instance) {
        let _guard = self.monitor.lock();
        self.singleton_objects.insert(bean_name.to_string(), instance);
        self.singleton_factories.lock().remove(bean_name);
        self.early_singleton_objects.remove(bean_name);
        let mut registered = self.registered_singletons.lock();
        if !registered.iter().any(|n| n == bean_name) {
            registered.push(bean_name.to_string());
        }
    }

    /// Register the factory producing an early reference for a singleton under construction
    pub fn add_singleton_factory(&self, bean_name: &str, factory: SingletonFactory) {
        let _guard = self.monitor.lock();
        if !self.singleton_objects.contains_key(bean_name) {
            self.singleton_factories.lock().insert(bean_name.to_string(), factory);
            self.early_singleton_objects.remove(bean_name);
            let mut registered = self.registered_singletons.lock();
            if !registered.iter().any(|n| n == bean_name) {
                registered.push(bean_name.to_string());
            }
        }
    }

    /// Look up a singleton, allowing an early reference for one in creation
    pub fn get_singleton(&self, bean_name: &str) -> Result<Option<Instance>, CoreError> {
        self.get_singleton_with(bean_name, true)
    }

    /// Look up a singleton; `allow_early_reference` permits running its singleton factory
    pub fn get_singleton_with(
        &self,
        bean_name: &str,
        allow_early_reference: bool,
    ) -> Result<Option<Instance>, CoreError> {
        if let Some(instance) = self.cached(&self.singleton_objects, bean_name) {
            return Ok(Some(instance));
        }
        if !self.is_singleton_currently_in_creation(bean_name) {
            return Ok(None);
        }
        if let Some(early) = self.cached(&self.early_singleton_objects, bean_name) {
            return Ok(Some(early));
        }
        if !allow_early_reference {
            return Ok(None);
        }

        let _guard = self.monitor.lock();
        // another thread may have finished while we waited for the monitor
        if let Some(instance) = self.cached(&self.singleton_objects, bean_name) {
            return Ok(Some(instance));
        }
        if let Some(early) = self.cached(&self.early_singleton_objects, bean_name) {
            return Ok(Some(early));
        }
        let factory = self.singleton_factories.lock().get(bean_name).cloned();
        match factory {
            Some(factory) => {
                let early = factory()?;
                self.early_singleton_objects
                    .insert(bean_name.to_string(), early.clone());
                self.singleton_factories.lock().remove(bean_name);
                Ok(Some(early))
            }
            None => Ok(None),
        }
    }

    fn cached(&self, map: &DashMap<String, Instance>, bean_name: &str) -> Option<Instance> {
        map.get(bean_name).map(|entry| entry.value().clone())
    }

    /// Return the singleton, creating it with `factory` if it does not exist yet.
    ///
    /// The factory runs at most once per name no matter how many threads ask.
    pub fn get_singleton_or_create<F>(&self, bean_name: &str, factory: F) -> Result<Instance, CoreError>
    where
        F: FnOnce() -> Result<Instance, CoreError>,
    {
        let _guard = self.monitor.lock();
        if let Some(existing) = self.cached(&self.singleton_objects, bean_name) {
            return Ok(existing);
        }
        if self.singletons_currently_in_destruction.load(Ordering::SeqCst) {
            return Err(CoreError::BeanCreationNotAllowed {
                bean_name: bean_name.to_string(),
                message: "Singleton bean creation not allowed while singletons of this factory are in destruction (Do not request a bean from a BeanFactory in a destroy method implementation!)".to_string(),
            });
        }
        debug!("Creating shared instance of singleton bean '{}'", bean_name);
        self.before_singleton_creation(bean_name)?;

        let record_suppressed = {
            let mut suppressed = self.suppressed_errors.lock();
            if suppressed.is_none() {
                *suppressed = Some(Vec::new());
                true
            } else {
                false
            }
        };

        let outcome = match factory() {
            Ok(instance) => Ok((instance, true)),
            // the singleton may have appeared implicitly in the meantime
            Err(err) if err.is_illegal_state() => match self.cached(&self.singleton_objects, bean_name) {
                Some(instance) => Ok((instance, false)),
                None => Err(err),
            },
            Err(mut err) => {
                if record_suppressed {
                    let suppressed = self.suppressed_errors.lock().take().unwrap_or_default();
                    for cause in suppressed {
                        err.add_related_cause(cause);
                    }
                }
                Err(err)
            }
        };

        if record_suppressed {
            *self.suppressed_errors.lock() = None;
        }
        let after = self.after_singleton_creation(bean_name);

        let (instance, new_singleton) = outcome?;
        after?;
        if new_singleton {
            self.add_singleton(bean_name, instance.clone());
        }
        Ok(instance)
    }

    /// Record an error swallowed during the current singleton creation
    pub fn on_suppressed_error(&self, err: CoreError) {
        let _guard = self.monitor.lock();
        if let Some(suppressed) = self.suppressed_errors.lock().as_mut() {
            if suppressed.len() < self.suppressed_limit {
                suppressed.push(err);
            }
        }
    }

    /// Remove every cached form of a singleton
    pub fn remove_singleton(&self, bean_name: &str) {
        let _guard = self.monitor.lock();
        self.singleton_objects.remove(bean_name);
        self.singleton_factories.lock().remove(bean_name);
        self.early_singleton_objects.remove(bean_name);
        self.registered_singletons.lock().retain(|n| n != bean_name);
    }

    pub fn contains_singleton(&self, bean_name: &str) -> bool {
        self.singleton_objects.contains_key(bean_name)
    }

    /// Names of registered singletons, in registration order
    pub fn singleton_names(&self) -> Vec<String> {
        let _guard = self.monitor.lock();
        self.registered_singletons.lock().clone()
    }

    pub fn singleton_count(&self) -> usize {
        let _guard = self.monitor.lock();
        self.registered_singletons.lock().len()
    }

    /// Include (`true`) or exclude (`false`) a bean from in-creation checks
    pub fn set_currently_in_creation(&self, bean_name: &str, in_creation: bool) {
        if in_creation {
            self.in_creation_check_exclusions.remove(bean_name);
        } else {
            self.in_creation_check_exclusions.insert(bean_name.to_string());
        }
    }

    pub fn is_currently_in_creation(&self, bean_name: &str) -> bool {
        !self.in_creation_check_exclusions.contains(bean_name)
            && self.is_singleton_currently_in_creation(bean_name)
    }

    pub fn is_singleton_currently_in_creation(&self, bean_name: &str) -> bool {
        self.singletons_currently_in_creation.contains(bean_name)
    }

    fn before_singleton_creation(&self, bean_name: &str) -> Result<(), CoreError> {
        if !self.in_creation_check_exclusions.contains(bean_name)
            && !self.singletons_currently_in_creation.insert(bean_name.to_string())
        {
            return Err(CoreError::currently_in_creation(bean_name));
        }
        Ok(())
    }

    fn after_singleton_creation(&self, bean_name: &str) -> Result<(), CoreError> {
        if !self.in_creation_check_exclusions.contains(bean_name)
            && self.singletons_currently_in_creation.remove(bean_name).is_none()
        {
            return Err(CoreError::illegal_state(format!(
                "Singleton '{}' isn't currently in creation",
                bean_name
            )));
        }
        Ok(())
    }

    /// Register a destruction callback; destruction runs in reverse registration order
    pub fn register_disposable_bean(&self, bean_name: &str, bean: Arc<dyn DisposableBean>) {
        let mut disposables = self.disposable_beans.lock();
        disposables.retain(|(name, _)| name != bean_name);
        disposables.push((bean_name.to_string(), bean));
    }

    /// Record that `contained` is an inner bean of `containing`; it is destroyed first
    pub fn register_contained_bean(&self, contained: &str, containing: &str) {
        {
            let mut contained_map = self.contained_beans.lock();
            let entry = contained_map.entry(containing.to_string()).or_default();
            if entry.iter().any(|c| c == contained) {
                return;
            }
            entry.push(contained.to_string());
        }
        self.register_dependent_bean(contained, containing);
    }

    /// Record that `dependent` needs `bean`, so `dependent` is destroyed before it
    pub fn register_dependent_bean(&self, bean: &str, dependent: &str) {
        let canonical = self.aliases.canonical_name(bean);
        self.dependencies.register(&canonical, dependent);
    }

    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        let canonical = self.aliases.canonical_name(bean);
        self.dependencies.is_dependent(&canonical, dependent)
    }

    pub fn has_dependent_bean(&self, bean: &str) -> bool {
        self.dependencies.has_dependents(bean)
    }

    pub fn dependent_beans(&self, bean: &str) -> Vec<String> {
        self.dependencies.dependents_of(bean)
    }

    pub fn dependencies_for_bean(&self, bean: &str) -> Vec<String> {
        self.dependencies.dependencies_of(bean)
    }

    /// Destroy every singleton, most recently registered first
    pub fn destroy_singletons(&self) {
        debug!("Destroying singletons in {:?}", self);
        self.singletons_currently_in_destruction
            .store(true, Ordering::SeqCst);

        let names: Vec<String> = self
            .disposable_beans
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.contained_beans.lock().clear();
        self.dependencies.clear();
        self.clear_singleton_cache();
    }

    fn clear_singleton_cache(&self) {
        let _guard = self.monitor.lock();
        self.singleton_objects.clear();
        self.singleton_factories.lock().clear();
        self.early_singleton_objects.clear();
        self.registered_singletons.lock().clear();
        self.singletons_currently_in_destruction
            .store(false, Ordering::SeqCst);
    }

    /// Remove a singleton and run its destruction, dependents first
    pub fn destroy_singleton(&self, bean_name: &str) {
        self.remove_singleton(bean_name);
        let disposable = {
            let mut disposables = self.disposable_beans.lock();
            disposables
                .iter()
                .position(|(name, _)| name == bean_name)
                .map(|index| disposables.remove(index).1)
        };
        self.destroy_bean(bean_name, disposable);
    }

    fn destroy_bean(&self, bean_name: &str, bean: Option<Arc<dyn DisposableBean>>) {
        let dependents = self.dependencies.take_dependents(bean_name);
        if !dependents.is_empty() {
            trace!("Retrieved dependent beans for bean '{}': {:?}", bean_name, dependents);
        }
        for dependent in &dependents {
            self.destroy_singleton(dependent);
        }

        if let Some(bean) = bean {
            if let Err(err) = bean.destroy() {
                warn!("Destruction of bean with name '{}' threw an exception: {}", bean_name, err);
            }
        }

        let contained = self.contained_beans.lock().remove(bean_name);
        if let Some(contained) = contained {
            for inner in &contained {
                self.destroy_singleton(inner);
            }
        }

        self.dependencies.prune(bean_name);
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<(), CoreError> {
        self.aliases.register_alias(name, alias)
    }

    pub fn canonical_name(&self, name: &str) -> String {
        self.aliases.canonical_name(name)
    }

    pub fn aliases(&self, name: &str) -> Vec<String> {
        self.aliases.aliases_of(name)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.is_alias(name)
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("singletons", &self.singleton_objects.len())
            .field("early_singletons", &self.early_singleton_objects.len())
            .field("in_creation", &self.singletons_currently_in_creation.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeInfo;
    use std::sync::atomic::AtomicUsize;

    fn bean(name: &str) -> Instance {
        Instance::new(name.to_string(), TypeInfo::class(name).build())
    }

    struct RecordingDisposable {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl DisposableBean for RecordingDisposable {
        fn destroy(&self) -> Result<(), CoreError> {
            self.log.lock().push(self.name.clone());
            if self.fail {
                return Err(CoreError::illegal_state("destroy failed"));
            }
            Ok(())
        }
    }

    fn disposable(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn DisposableBean> {
        Arc::new(RecordingDisposable {
            name: name.to_string(),
            log: log.clone(),
            fail,
        })
    }

    #[test]
    fn test_register_singleton_rejects_duplicates() {
        let registry = SingletonRegistry::new();
        registry.register_singleton("a", bean("A")).unwrap();

        let err = registry.register_singleton("a", bean("A")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateSingleton { .. }));
        assert!(err.is_configuration());
        assert_eq!(registry.singleton_names(), vec!["a"]);
    }

    #[test]
    fn test_get_singleton_or_create_invokes_factory_once() {
        let registry = SingletonRegistry::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .get_singleton_or_create("svc", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(bean("Svc"))
            })
            .unwrap();
        let second = registry
            .get_singleton_or_create("svc", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(bean("Svc"))
            })
            .unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.is_currently_in_creation("svc"));
    }

    #[test]
    fn test_reentrant_creation_is_rejected() {
        let registry = SingletonRegistry::new();
        let result = registry.get_singleton_or_create("a", || {
            registry.get_singleton_or_create("a", || Ok(bean("A")))
        });

        let err = result.unwrap_err();
        assert!(err.is_circular_reference());
        assert!(!registry.contains_singleton("a"));
    }

    #[test]
    fn test_early_reference_through_singleton_factory() {
        let registry = SingletonRegistry::new();
        let raw = bean("A");

        let created = registry
            .get_singleton_or_create("a", || {
                let early_source = raw.clone();
                registry.add_singleton_factory("a", Arc::new(move || Ok(early_source.clone())));

                let early = registry.get_singleton("a")?.expect("early reference");
                assert!(early.ptr_eq(&raw));
                // second lookup is served from the early cache
                assert!(registry.get_singleton("a")?.unwrap().ptr_eq(&raw));
                assert!(registry.get_singleton_with("a", false)?.is_some());
                Ok(raw.clone())
            })
            .unwrap();

        assert!(created.ptr_eq(&raw));
        assert!(registry.get_singleton_with("a", false).unwrap().unwrap().ptr_eq(&raw));
    }

    #[test]
    fn test_not_in_creation_gives_no_early_reference() {
        let registry = SingletonRegistry::new();
        registry.add_singleton_factory("a", Arc::new(|| Ok(bean("A"))));
        assert!(registry.get_singleton("a").unwrap().is_none());
    }

    #[test]
    fn test_suppressed_errors_become_related_causes() {
        let registry = SingletonRegistry::with_suppressed_limit(2);
        let err = registry
            .get_singleton_or_create("a", || {
                registry.on_suppressed_error(CoreError::illegal_state("one"));
                registry.on_suppressed_error(CoreError::illegal_state("two"));
                registry.on_suppressed_error(CoreError::illegal_state("three"));
                Err(CoreError::bean_creation("a", "failed"))
            })
            .unwrap_err();

        assert_eq!(err.related_causes().len(), 2);
        // the list is reset for the next creation
        let err = registry
            .get_singleton_or_create("b", || Err(CoreError::bean_creation("b", "failed")))
            .unwrap_err();
        assert!(err.related_causes().is_empty());
    }

    #[test]
    fn test_destroy_singletons_in_reverse_order_with_dependents_first() {
        let registry = SingletonRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["dataSource", "repo", "service"] {
            registry.register_singleton(name, bean(name)).unwrap();
        }
        registry.register_disposable_bean("repo", disposable("repo", &log, false));
        registry.register_disposable_bean("dataSource", disposable("dataSource", &log, true));
        registry.register_disposable_bean("service", disposable("service", &log, false));
        registry.register_dependent_bean("dataSource", "repo");

        registry.destroy_singletons();

        // service is last registered; dataSource pulls repo down first even though repo
        // was registered earlier; its failing callback does not stop the rest
        assert_eq!(*log.lock(), vec!["service", "repo", "dataSource"]);
        assert_eq!(registry.singleton_count(), 0);
        assert!(!registry.has_dependent_bean("dataSource"));
    }

    #[test]
    fn test_creation_refused_during_destruction() {
        let registry = Arc::new(SingletonRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        struct Reentrant {
            registry: Arc<SingletonRegistry>,
            log: Arc<Mutex<Vec<String>>>,
        }
        impl DisposableBean for Reentrant {
            fn destroy(&self) -> Result<(), CoreError> {
                let result = self.registry.get_singleton_or_create("late", || Ok(bean("Late")));
                if let Err(CoreError::BeanCreationNotAllowed { .. }) = result {
                    self.log.lock().push("refused".to_string());
                }
                Ok(())
            }
        }

        registry.register_singleton("a", bean("A")).unwrap();
        registry.register_disposable_bean(
            "a",
            Arc::new(Reentrant {
                registry: registry.clone(),
                log: log.clone(),
            }),
        );
        registry.destroy_singletons();

        assert_eq!(*log.lock(), vec!["refused"]);
    }

    #[test]
    fn test_in_creation_exclusions() {
        let registry = SingletonRegistry::new();
        registry.set_currently_in_creation("a", false);
        let nested = registry.get_singleton_or_create("a", || {
            assert!(!registry.is_currently_in_creation("a"));
            Ok(bean("A"))
        });
        assert!(nested.is_ok());
    }
}
