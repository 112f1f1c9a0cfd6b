use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Bidirectional record of which beans depend on which.
///
/// `dependent_beans[a]` lists the beans that need `a`; `dependencies_for[b]`
/// lists the beans `b` needs. Both keep registration order so destruction runs
/// deterministically.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependent_beans: Mutex<HashMap<String, Vec<String>>>,
    dependencies_for: Mutex<HashMap<String, Vec<String>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` needs `bean`
    pub fn register(&self, bean: &str, dependent: &str) {
        {
            let mut dependents = self.dependent_beans.lock();
            let entry = dependents.entry(bean.to_string()).or_default();
            if entry.iter().any(|d| d == dependent) {
                return;
            }
            entry.push(dependent.to_string());
        }
        let mut dependencies = self.dependencies_for.lock();
        let entry = dependencies.entry(dependent.to_string()).or_default();
        if !entry.iter().any(|d| d == bean) {
            entry.push(bean.to_string());
        }
    }

    /// Whether `dependent` needs `bean`, directly or through other beans
    pub fn is_dependent(&self, bean: &str, dependent: &str) -> bool {
        let mut already_seen = HashSet::new();
        self.is_dependent_inner(bean, dependent, &mut already_seen)
    }

    fn is_dependent_inner(&self, bean: &str, dependent: &str, already_seen: &mut HashSet<String>) -> bool {
        if already_seen.contains(bean) {
            return false;
        }
        // snapshot so the lock is not held across recursion
        let direct = match self.dependent_beans.lock().get(bean) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return false,
        };
        if direct.iter().any(|d| d == dependent) {
            return true;
        }
        already_seen.insert(bean.to_string());
        direct
            .iter()
            .any(|transitive| self.is_dependent_inner(transitive, dependent, already_seen))
    }

    pub fn has_dependents(&self, bean: &str) -> bool {
        self.dependent_beans
            .lock()
            .get(bean)
            .map_or(false, |list| !list.is_empty())
    }

    /// Beans that need `bean`
    pub fn dependents_of(&self, bean: &str) -> Vec<String> {
        self.dependent_beans.lock().get(bean).cloned().unwrap_or_default()
    }

    /// Beans that `bean` needs
    pub fn dependencies_of(&self, bean: &str) -> Vec<String> {
        self.dependencies_for.lock().get(bean).cloned().unwrap_or_default()
    }

    /// Detach and return the dependents of `bean`
    pub fn take_dependents(&self, bean: &str) -> Vec<String> {
        self.dependent_beans.lock().remove(bean).unwrap_or_default()
    }

    /// Forget `bean` entirely: drop it from every dependents list and its own dependencies
    pub fn prune(&self, bean: &str) {
        self.dependent_beans.lock().retain(|_, dependents| {
            dependents.retain(|d| d != bean);
            !dependents.is_empty()
        });
        self.dependencies_for.lock().remove(bean);
    }

    pub fn clear(&self) {
        self.dependent_beans.lock().clear();
        self.dependencies_for.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_symmetric_and_deduplicated() {
        let graph = DependencyGraph::new();
        graph.register("dataSource", "repo");
        graph.register("dataSource", "repo");
        graph.register("dataSource", "audit");

        assert_eq!(graph.dependents_of("dataSource"), vec!["repo", "audit"]);
        assert_eq!(graph.dependencies_of("repo"), vec!["dataSource"]);
    }

    #[test]
    fn test_is_dependent_is_transitive() {
        let graph = DependencyGraph::new();
        graph.register("a", "b");
        graph.register("b", "c");

        assert!(graph.is_dependent("a", "b"));
        assert!(graph.is_dependent("a", "c"));
        assert!(!graph.is_dependent("c", "a"));
    }

    #[test]
    fn test_is_dependent_terminates_on_cycles() {
        let graph = DependencyGraph::new();
        graph.register("a", "b");
        graph.register("b", "a");

        assert!(graph.is_dependent("a", "b"));
        assert!(!graph.is_dependent("a", "z"));
    }

    #[test]
    fn test_prune_removes_empty_entries() {
        let graph = DependencyGraph::new();
        graph.register("a", "b");
        graph.register("c", "b");
        graph.prune("b");

        assert!(!graph.has_dependents("a"));
        assert!(!graph.has_dependents("c"));
        assert!(graph.dependencies_of("b").is_empty());
    }
}
