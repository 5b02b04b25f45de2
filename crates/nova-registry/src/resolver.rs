//! Resolver (Component D, `spec.md` §4.D).
//!
//! Links extensions to extension points and manages the orphan table.
//! Invoked from the facade's `add`/`remove` after the object manager has
//! already ingested (add) or before it discards (remove) a namespace.
//! All deltas produced by a call are recorded under the bundle id being
//! added or removed — even when the affected extension belongs to a
//! *different*, still-resident namespace (scenario 1/2 in `spec.md` §8: an
//! extension point add in bundle `B` resolving an orphan from bundle `A`
//! is reported under `B`, the bundle whose mutation caused the change).

use crate::delta::{DeltaAccumulator, DeltaKind};
use crate::error::RegistryError;
use crate::id::BundleId;
use crate::object_manager::ObjectManager;

/// Links a freshly-ingested namespace's extension points and extensions.
/// Mirrors `basicAdd(namespace, link=true)`.
pub fn link_namespace(
    manager: &mut ObjectManager,
    bundle_id: BundleId,
    deltas: &mut DeltaAccumulator,
    listeners_present: bool,
) -> Result<(), RegistryError> {
    let point_ids = manager.extension_points_from(bundle_id).to_vec();
    for point_id in point_ids {
        let point = manager
            .extension_point_mut(point_id)
            .expect("point just inserted by add_namespace");

        if !point.raw_children.is_empty() {
            // `spec.md` §9 Open Question (a): the original source treats this
            // as unreachable; we reject it rather than silently dropping the
            // pre-existing children.
            return Err(RegistryError::OrphanConsistency { id: point_id });
        }

        let orphaned = manager.take_orphans(point.unique_identifier.as_str());
        if !orphaned.is_empty() {
            for &extension_id in &orphaned {
                deltas.record_extension(
                    bundle_id,
                    extension_id,
                    point.unique_identifier.clone(),
                    DeltaKind::Added,
                    listeners_present,
                );
            }
            manager.set_extension_point_children(point_id, orphaned);
        }
    }

    let extension_ids = manager.extensions_from(bundle_id).to_vec();
    for extension_id in extension_ids {
        let extension = manager
            .extension(extension_id)
            .expect("extension just inserted by add_namespace");
        let target = extension.extension_point_identifier.clone();

        match manager.extension_point_id_for_unique(target.as_str()) {
            Some(point_id) => {
                let mut point = manager
                    .extension_point_mut(point_id)
                    .expect("indexed point must resolve");
                point.raw_children.push(extension_id);
                let children = point.raw_children.clone();
                manager.set_extension_point_children(point_id, children);
                deltas.record_extension(
                    bundle_id,
                    extension_id,
                    target,
                    DeltaKind::Added,
                    listeners_present,
                );
            }
            None => {
                manager.push_orphan(target, extension_id);
            }
        }
    }

    Ok(())
}

/// Unlinks a departing namespace's extension points and extensions, in the
/// order `spec.md` §4.D mandates: extensions first, then extension points
/// (moving their live children back into the orphan table), then — by the
/// caller, after this returns — the namespace record itself.
///
/// Every `REMOVED` extension delta here is recorded unconditionally,
/// independent of whether any listener is registered: unlike an `ADDED`
/// delta (pure notification, safely dropped per §4.E's optimization), a
/// `REMOVED` delta is what drives the dispatcher's deferred physical
/// cleanup (§4.F) — skipping it would leave the extension's row (and its
/// configuration-element subtree) stranded in the object manager forever.
pub fn unlink_namespace(manager: &mut ObjectManager, bundle_id: BundleId, deltas: &mut DeltaAccumulator) {
    let extension_ids = manager.extensions_from(bundle_id).to_vec();
    for extension_id in extension_ids {
        let Some(extension) = manager.extension(extension_id) else {
            continue;
        };
        let target = extension.extension_point_identifier.clone();
        match manager.extension_point_id_for_unique(target.as_str()) {
            Some(point_id) => {
                let point = manager
                    .extension_point_mut(point_id)
                    .expect("indexed point must resolve");
                let mut children = point.raw_children.clone();
                children.retain(|&id| id != extension_id);
                manager.set_extension_point_children(point_id, children);
            }
            None => {
                manager.remove_orphan(target.as_str(), extension_id);
            }
        }
        deltas.record_extension(bundle_id, extension_id, target, DeltaKind::Removed, true);
    }

    let point_ids = manager.extension_points_from(bundle_id).to_vec();
    for point_id in point_ids {
        let Some(point) = manager.extension_point_mut(point_id) else {
            continue;
        };
        let linked = point.raw_children.clone();
        let unique_id = point.unique_identifier.clone();
        for &extension_id in &linked {
            deltas.record_extension(bundle_id, extension_id, unique_id.clone(), DeltaKind::Removed, true);
        }
        deltas.record_extension_point_removed(bundle_id, unique_id.clone());
        manager.mark_extension_point_removed(unique_id.clone());

        manager.set_extension_point_children(point_id, Vec::new());
        // Extensions linked into a departing point may belong to still-
        // resident namespaces; they become orphans again, not garbage.
        for extension_id in linked {
            manager.push_orphan(unique_id.clone(), extension_id);
        }
    }
}
