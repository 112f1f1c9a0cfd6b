use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::errors::CoreError;

/// Alternative names resolving to a canonical bean name
#[derive(Debug, Default)]
pub struct AliasRegistry {
    aliases: RwLock<HashMap<String, String>>,
    allow_overriding: bool,
}

impl AliasRegistry {
    pub fn new(allow_overriding: bool) -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
            allow_overriding,
        }
    }

    /// Register `alias` for `name`; an alias equal to the name removes it
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<(), CoreError> {
        let mut aliases = self.aliases.write();
        if alias == name {
            aliases.remove(alias);
            debug!("Alias definition '{}' ignored since it points to same name", alias);
            return Ok(());
        }
        if let Some(registered) = aliases.get(alias) {
            if registered == name {
                return Ok(());
            }
            if !self.allow_overriding {
                return Err(CoreError::illegal_state(format!(
                    "Cannot define alias '{}' for name '{}': It is already registered for name '{}'.",
                    alias, name, registered
                )));
            }
            debug!(
                "Overriding alias '{}' definition for registered name '{}' with new target name '{}'",
                alias, registered, name
            );
        }
        if Self::has_alias_in(&aliases, alias, name) {
            return Err(CoreError::illegal_state(format!(
                "Cannot register alias '{}' for name '{}': Circular reference - '{}' is a direct or indirect alias for '{}' already",
                alias, name, name, alias
            )));
        }
        aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    fn has_alias_in(aliases: &HashMap<String, String>, name: &str, alias: &str) -> bool {
        aliases.iter().any(|(registered_alias, registered_name)| {
            registered_name == name
                && (registered_alias == alias || Self::has_alias_in(aliases, registered_alias, alias))
        })
    }

    /// Whether `alias` resolves to `name`, directly or through other aliases
    pub fn has_alias(&self, name: &str, alias: &str) -> bool {
        Self::has_alias_in(&self.aliases.read(), name, alias)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.read().contains_key(name)
    }

    pub fn remove_alias(&self, alias: &str) -> Result<(), CoreError> {
        self.aliases
            .write()
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| CoreError::illegal_state(format!("No alias '{}' registered", alias)))
    }

    /// All aliases that resolve to `name`
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let aliases = self.aliases.read();
        let mut result = Vec::new();
        Self::collect_aliases(&aliases, name, &mut result);
        result
    }

    fn collect_aliases(aliases: &HashMap<String, String>, name: &str, result: &mut Vec<String>) {
        for (alias, registered) in aliases.iter() {
            if registered == name && !result.contains(alias) {
                result.push(alias.clone());
                Self::collect_aliases(aliases, alias, result);
            }
        }
    }

    /// Follow alias links until reaching a name that is not an alias
    pub fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.read();
        let mut canonical = name.to_string();
        while let Some(resolved) = aliases.get(&canonical) {
            canonical = resolved.clone();
        }
        canonical
    }
}
