//! Registry change listeners and events (`spec.md` §4.F, §6).

use crate::delta::RegistryDelta;
use crate::id::BundleId;
use std::collections::HashMap;
use std::sync::Arc;

/// A per-bundle snapshot of accumulated deltas, handed to listeners.
///
/// Accessors yield only the deltas matching a listener's namespace filter
/// when one was registered (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct RegistryChangeEvent {
    deltas: Arc<HashMap<BundleId, RegistryDelta>>,
    filter: Option<BundleId>,
}

impl RegistryChangeEvent {
    pub(crate) fn new(deltas: Arc<HashMap<BundleId, RegistryDelta>>, filter: Option<BundleId>) -> Self {
        Self { deltas, filter }
    }

    /// Deltas visible to this event, honoring the listener's filter.
    pub fn deltas(&self) -> HashMap<BundleId, RegistryDelta> {
        match self.filter {
            Some(bundle_id) => self
                .deltas
                .get(&bundle_id)
                .map(|d| HashMap::from([(bundle_id, d.clone())]))
                .unwrap_or_default(),
            None => (*self.deltas).clone(),
        }
    }

    pub fn delta_for(&self, bundle_id: BundleId) -> Option<&RegistryDelta> {
        if let Some(filter) = self.filter {
            if filter != bundle_id {
                return None;
            }
        }
        self.deltas.get(&bundle_id)
    }
}

/// Implemented by subscribers of registry change notifications.
pub trait RegistryChangeListener: Send + Sync {
    fn changed(&self, event: &RegistryChangeEvent);
}

/// A registered listener plus its optional namespace filter.
pub(crate) struct ListenerEntry {
    pub(crate) listener: Arc<dyn RegistryChangeListener>,
    pub(crate) filter: Option<BundleId>,
}

impl Clone for ListenerEntry {
    fn clone(&self) -> Self {
        Self {
            listener: self.listener.clone(),
            filter: self.filter,
        }
    }
}

/// A single listener's delivery failure, aggregated into a dispatch's
/// status rather than aborting the dispatch (`spec.md` §7).
#[derive(Debug)]
pub struct ListenerFailure {
    pub filter: Option<BundleId>,
    pub panic_message: String,
}

/// Aggregate result of one dispatch job.
#[derive(Debug, Default)]
pub struct DispatchStatus {
    pub failures: Vec<ListenerFailure>,
}

impl DispatchStatus {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}
