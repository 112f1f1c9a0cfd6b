use std::cell::RefCell;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::types::Instance;

/// Bean scope enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BeanScope {
    /// Single instance shared by every consumer of the factory
    #[default]
    Singleton,
    /// New instance created for each lookup
    Prototype,
    /// Instance managed by a registered [`Scope`]
    Custom(String),
}

impl BeanScope {
    /// Check if the scope is singleton
    pub fn is_singleton(&self) -> bool {
        matches!(self, BeanScope::Singleton)
    }

    /// Check if the scope is prototype
    pub fn is_prototype(&self) -> bool {
        matches!(self, BeanScope::Prototype)
    }

    /// Get the scope name as a string
    pub fn as_str(&self) -> &str {
        match self {
            BeanScope::Singleton => "singleton",
            BeanScope::Prototype => "prototype",
            BeanScope::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for BeanScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BeanScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" => Err(CoreError::InvalidScope {
                scope: s.to_string(),
            }),
            "singleton" => Ok(BeanScope::Singleton),
            "prototype" => Ok(BeanScope::Prototype),
            _ => Ok(BeanScope::Custom(s.trim().to_string())),
        }
    }
}

/// Strategy backing a custom scope.
///
/// `get` returns the scoped object, calling `object_factory` only when the
/// scope does not hold one yet.
pub trait Scope: Send + Sync {
    fn get(
        &self,
        name: &str,
        object_factory: &mut dyn FnMut() -> Result<Instance, CoreError>,
    ) -> Result<Instance, CoreError>;

    fn remove(&self, name: &str) -> Option<Instance>;

    /// Callback run when the scoped object is removed; scopes without a lifecycle may ignore it
    fn register_destruction_callback(&self, _name: &str, _callback: Box<dyn FnOnce() + Send>) {}

    fn conversation_id(&self) -> Option<String> {
        None
    }
}

thread_local! {
    static THREAD_SCOPED: RefCell<HashMap<(uuid::Uuid, String), Instance>> = RefCell::new(HashMap::new());
    static THREAD_CALLBACKS: RefCell<HashMap<(uuid::Uuid, String), Box<dyn FnOnce() + Send>>> =
        RefCell::new(HashMap::new());
}

/// Scope holding one instance per thread
#[derive(Debug, Clone)]
pub struct ThreadScope {
    scope_id: uuid::Uuid,
}

impl ThreadScope {
    pub const NAME: &'static str = "thread";

    pub fn new() -> Self {
        Self {
            scope_id: uuid::Uuid::new_v4(),
        }
    }

    fn key(&self, name: &str) -> (uuid::Uuid, String) {
        (self.scope_id, name.to_string())
    }
}

impl Default for ThreadScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope for ThreadScope {
    fn get(
        &self,
        name: &str,
        object_factory: &mut dyn FnMut() -> Result<Instance, CoreError>,
    ) -> Result<Instance, CoreError> {
        let key = self.key(name);
        if let Some(existing) = THREAD_SCOPED.with(|scoped| scoped.borrow().get(&key).cloned()) {
            return Ok(existing);
        }
        // the factory may itself resolve thread-scoped beans, so no borrow is held here
        let created = object_factory()?;
        THREAD_SCOPED.with(|scoped| scoped.borrow_mut().insert(key, created.clone()));
        Ok(created)
    }

    fn remove(&self, name: &str) -> Option<Instance> {
        let key = self.key(name);
        let callback = THREAD_CALLBACKS.with(|callbacks| callbacks.borrow_mut().remove(&key));
        let removed = THREAD_SCOPED.with(|scoped| scoped.borrow_mut().remove(&key));
        if let Some(callback) = callback {
            callback();
        }
        removed
    }

    fn register_destruction_callback(&self, name: &str, callback: Box<dyn FnOnce() + Send>) {
        let key = self.key(name);
        THREAD_CALLBACKS.with(|callbacks| callbacks.borrow_mut().insert(key, callback));
    }

    fn conversation_id(&self) -> Option<String> {
        Some(format!("{:?}", std::thread::current().id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("singleton".parse::<BeanScope>().unwrap(), BeanScope::Singleton);
        assert_eq!("Prototype".parse::<BeanScope>().unwrap(), BeanScope::Prototype);
        assert_eq!(
            "thread".parse::<BeanScope>().unwrap(),
            BeanScope::Custom("thread".to_string())
        );
        assert!(matches!(
            "  ".parse::<BeanScope>(),
            Err(CoreError::InvalidScope { .. })
        ));
        assert_eq!(BeanScope::Custom("request".into()).to_string(), "request");
    }

    #[test]
    fn test_thread_scope_isolates_threads() {
        let scope = Arc::new(ThreadScope::new());
        let created = Arc::new(AtomicUsize::new(0));

        let make = |created: Arc<AtomicUsize>| {
            move || {
                created.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CoreError>(Instance::string("value"))
            }
        };

        let first = scope.get("bean", &mut make(created.clone())).unwrap();
        let second = scope.get("bean", &mut make(created.clone())).unwrap();
        assert!(first.ptr_eq(&second));

        let other_scope = scope.clone();
        let other_created = created.clone();
        let other = std::thread::spawn(move || other_scope.get("bean", &mut make(other_created)).unwrap())
            .join()
            .unwrap();
        assert!(!other.ptr_eq(&first));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_thread_scope_remove_runs_callback() {
        let scope = ThreadScope::new();
        let destroyed = Arc::new(AtomicUsize::new(0));
        scope
            .get("bean", &mut || Ok::<_, CoreError>(Instance::int(1)))
            .unwrap();
        let counter = destroyed.clone();
        scope.register_destruction_callback(
            "bean",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(scope.remove("bean").is_some());
        assert!(scope.remove("bean").is_none());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
