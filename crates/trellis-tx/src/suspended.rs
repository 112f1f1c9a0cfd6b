use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::definition::Isolation;
use crate::synchronization::TransactionSynchronization;

/// Snapshot of an outer transaction taken when it is suspended, restored
/// when the inner scope completes
#[derive(Default)]
pub struct SuspendedResourcesHolder {
    pub(crate) resources: Option<Box<dyn Any + Send + Sync>>,
    pub(crate) synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<Isolation>,
    pub(crate) was_active: bool,
}

impl SuspendedResourcesHolder {
    pub(crate) fn for_resources(resources: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            resources: Some(resources),
            ..Self::default()
        }
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn isolation(&self) -> Option<Isolation> {
        self.isolation
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }
}

impl fmt::Debug for SuspendedResourcesHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedResourcesHolder")
            .field("has_resources", &self.resources.is_some())
            .field("synchronizations", &self.synchronization_count())
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("isolation", &self.isolation)
            .field("was_active", &self.was_active)
            .finish()
    }
}
