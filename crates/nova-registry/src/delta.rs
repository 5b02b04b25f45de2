//! Delta Accumulator (Component E, `spec.md` §4.E).
//!
//! Builds per-bundle [`RegistryDelta`] entries during a mutation. Purely an
//! in-memory activity carried out under the write lock; the accumulated map
//! is handed to the dispatcher as a snapshot and then cleared.

use crate::id::{BundleId, Id};
use smol_str::SmolStr;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDelta {
    pub extension_id: Id,
    pub extension_point_id: SmolStr,
    pub kind: DeltaKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDelta {
    pub extension_deltas: Vec<ExtensionDelta>,
    pub removed_extension_points: BTreeSet<SmolStr>,
}

impl RegistryDelta {
    pub fn is_empty(&self) -> bool {
        self.extension_deltas.is_empty() && self.removed_extension_points.is_empty()
    }
}

/// Accumulates deltas for the mutation currently in flight.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    deltas: HashMap<BundleId, RegistryDelta>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an extension add/remove, unless `listeners_present` is false
    /// — per §4.E, recording is skipped entirely when nobody is listening,
    /// *except* for extension-point removal bookkeeping (handled
    /// separately by [`Self::record_extension_point_removed`], which the
    /// caller must still invoke regardless of listener presence so that
    /// physical-removal scheduling is not skipped).
    pub fn record_extension(
        &mut self,
        bundle_id: BundleId,
        extension_id: Id,
        extension_point_id: SmolStr,
        kind: DeltaKind,
        listeners_present: bool,
    ) {
        if !listeners_present {
            return;
        }
        self.deltas
            .entry(bundle_id)
            .or_default()
            .extension_deltas
            .push(ExtensionDelta {
                extension_id,
                extension_point_id,
                kind,
            });
    }

    /// Records that an extension point was removed. Always records,
    /// independent of listener presence: its removal triggers physical
    /// removal scheduling that must happen even with no listeners (§4.E).
    pub fn record_extension_point_removed(&mut self, bundle_id: BundleId, unique_id: SmolStr) {
        self.deltas
            .entry(bundle_id)
            .or_default()
            .removed_extension_points
            .insert(unique_id);
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(RegistryDelta::is_empty)
    }

    /// Takes a snapshot of the accumulated deltas and clears the live map,
    /// per §4.F ("each dispatch job captures ... the per-bundle delta map.
    /// After capture the live delta map is cleared").
    pub fn take_snapshot(&mut self) -> HashMap<BundleId, RegistryDelta> {
        std::mem::take(&mut self.deltas)
    }
}
