//! Object Manager (Component B, `spec.md` §4.B).
//!
//! Owns the four per-kind tables, the namespace index, the orphan table,
//! and the hot/cold cache plumbing. The three entity tables are each behind
//! their own `parking_lot::Mutex` so that a lazy cold-cache fault-in can
//! happen from a read-only query (the outer `RwLock<ObjectManager>` in
//! [`crate::registry::Shared`] is only held for *reading* at that point);
//! every other field is mutated only from `&mut self` methods, which the
//! facade only calls while holding the write side of that same lock.

use crate::cache::{CachePaths, CacheReader, CacheSnapshot, ColdEntry};
use crate::error::RegistryError;
use crate::id::{BundleId, EntityKind, Id};
use crate::ingest::{ConfigurationElementInput, IngestError, NamespaceInput};
use crate::model::{
    ConfigurationElementRecord, Entity, ExtensionPointRecord, ExtensionRecord, ExtraData,
    NamespaceRecord,
};
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct ColdStore {
    reader: Option<CacheReader>,
    index: HashMap<Id, ColdEntry>,
}

/// Diagnostic snapshot, not part of any invariant (`SPEC_FULL.md` §4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectManagerStats {
    pub extension_points: usize,
    pub extensions: usize,
    pub configuration_elements: usize,
    pub orphans: usize,
    pub namespaces: usize,
}

pub struct ObjectManager {
    extension_points: Mutex<HashMap<Id, ExtensionPointRecord>>,
    extensions: Mutex<HashMap<Id, ExtensionRecord>>,
    config_elements: Mutex<HashMap<Id, ConfigurationElementRecord>>,
    extras: HashMap<Id, ExtraData>,

    namespaces: HashMap<BundleId, NamespaceRecord>,
    unique_id_index: HashMap<SmolStr, Id>,
    /// Unique ids whose point has been logically removed (delta recorded,
    /// namespace already unlinked) but whose row awaits the dispatcher's
    /// physical cleanup. Gates `extension_point_id_for_unique` so a lookup
    /// racing ahead of cleanup treats the point as already gone instead of
    /// linking a fresh extension into a row about to be destroyed.
    pending_point_removal: std::collections::HashSet<SmolStr>,
    /// Target identifier -> ordered extension ids whose target point isn't resident.
    orphans: BTreeMap<SmolStr, Vec<Id>>,
    extensions_from_bundle: HashMap<BundleId, Vec<Id>>,
    extension_points_from_bundle: HashMap<BundleId, Vec<Id>>,

    next_id: Id,
    dirty: bool,
    cold: ColdStore,
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            extension_points: Mutex::new(HashMap::new()),
            extensions: Mutex::new(HashMap::new()),
            config_elements: Mutex::new(HashMap::new()),
            extras: HashMap::new(),
            namespaces: HashMap::new(),
            unique_id_index: HashMap::new(),
            pending_point_removal: std::collections::HashSet::new(),
            orphans: BTreeMap::new(),
            extensions_from_bundle: HashMap::new(),
            extension_points_from_bundle: HashMap::new(),
            next_id: 1,
            dirty: false,
            cold: ColdStore::default(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Attempts to initialize from the on-disk cache. Succeeds only if the
    /// cache stamp equals `expected_stamp`; any I/O or format failure
    /// swallows the error and returns `false`, leaving the manager empty
    /// (`spec.md` §4.B, §7: cache errors during init are swallowed).
    pub fn init(
        &mut self,
        paths: &CachePaths,
        expected_stamp: i64,
        namespace_path: &std::path::Path,
        lazy: bool,
    ) -> bool {
        let reader = match CacheReader::open(paths, expected_stamp) {
            Ok(Some(r)) => {
                tracing::debug!(target: "nova.registry.cache", stamp = r.stamp, "cache opened");
                r
            }
            Ok(None) => {
                tracing::debug!(target: "nova.registry.cache", "cache stamp mismatch; rebuilding");
                return false;
            }
            Err(err) => {
                tracing::warn!(target: "nova.registry.cache", error = %err, "cache init failed; rebuilding");
                return false;
            }
        };

        let namespaces = match reader.read_namespaces(namespace_path) {
            Ok(ns) => ns,
            Err(err) => {
                tracing::warn!(target: "nova.registry.cache", error = %err, "namespace cache unreadable; rebuilding");
                return false;
            }
        };

        self.next_id = reader
            .index()
            .keys()
            .copied()
            .max()
            .map(|m| m + 1)
            .unwrap_or(1);

        for ns in namespaces.values() {
            if let Some(unique) = &ns.unique_identifier {
                let _ = unique; // namespace identifiers aren't separately indexed
            }
        }
        self.namespaces = namespaces;
        for (bundle_id, ns) in &self.namespaces {
            self.extensions_from_bundle
                .insert(*bundle_id, ns.extension_ids.clone());
            self.extension_points_from_bundle
                .insert(*bundle_id, ns.extension_point_ids.clone());
        }

        self.cold.index = reader.index().clone();
        self.cold.reader = Some(reader);

        // Extension point unique-id index requires materializing points
        // (their identifiers aren't stored in the table segment).
        let point_ids: Vec<Id> = self
            .cold
            .index
            .iter()
            .filter(|(_, e)| e.kind == EntityKind::ExtensionPoint)
            .map(|(id, _)| *id)
            .collect();
        for id in point_ids {
            if let Some(Entity::ExtensionPoint(rec)) = self.get_entity(id, EntityKind::ExtensionPoint) {
                self.unique_id_index.insert(rec.unique_identifier.clone(), id);
            }
        }

        if !lazy {
            self.materialize_all();
        }

        self.dirty = false;
        true
    }

    fn alloc_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Materializes every cold row into its hot table; used before a save
    /// so the writer can iterate a complete snapshot.
    pub fn materialize_all(&mut self) {
        let ids: Vec<(Id, ColdEntry)> = self.cold.index.iter().map(|(id, e)| (*id, *e)).collect();
        for (id, entry) in ids {
            self.get_entity(id, entry.kind);
        }
    }

    // ---- kind-checked accessors (§4.B) -------------------------------------

    /// Resolves an entity regardless of expected kind, faulting in a cold
    /// row on first access. Used internally by the kind-checked wrappers and
    /// by [`crate::id::Handle::resolve`].
    pub fn get_entity(&self, id: Id, kind: EntityKind) -> Option<Entity> {
        match kind {
            EntityKind::ExtensionPoint => {
                if let Some(rec) = self.extension_points.lock().get(&id).cloned() {
                    return Some(Entity::ExtensionPoint(rec));
                }
                let entry = *self.cold.index.get(&id)?;
                if entry.kind != EntityKind::ExtensionPoint {
                    return None;
                }
                let rec = self.cold.reader.as_ref()?.read_extension_point(id, entry).ok()?;
                self.extension_points.lock().insert(id, rec.clone());
                Some(Entity::ExtensionPoint(rec))
            }
            EntityKind::Extension => {
                if let Some(rec) = self.extensions.lock().get(&id).cloned() {
                    return Some(Entity::Extension(rec));
                }
                let entry = *self.cold.index.get(&id)?;
                if entry.kind != EntityKind::Extension {
                    return None;
                }
                let rec = self.cold.reader.as_ref()?.read_extension(id, entry).ok()?;
                self.extensions.lock().insert(id, rec.clone());
                Some(Entity::Extension(rec))
            }
            EntityKind::ConfigurationElement | EntityKind::ThirdLevelConfigurationElement => {
                if let Some(rec) = self.config_elements.lock().get(&id).cloned() {
                    if rec.kind() != kind {
                        return None;
                    }
                    return Some(Entity::ConfigurationElement(rec));
                }
                let entry = *self.cold.index.get(&id)?;
                if entry.kind != kind {
                    return None;
                }
                let rec = self
                    .cold
                    .reader
                    .as_ref()?
                    .read_config_element(id, entry)
                    .ok()?;
                self.config_elements.lock().insert(id, rec.clone());
                Some(Entity::ConfigurationElement(rec))
            }
        }
    }

    pub fn get_object(&self, id: Id, kind: EntityKind) -> Result<Entity, RegistryError> {
        match self.get_entity(id, kind) {
            Some(entity) if entity.kind() == kind => Ok(entity),
            Some(entity) => Err(RegistryError::KindMismatch {
                id,
                expected: kind,
                found: entity.kind(),
            }),
            None => Err(RegistryError::StaleHandle { id, kind }),
        }
    }

    pub fn get_objects(&self, ids: &[Id], kind: EntityKind) -> Result<Vec<Entity>, RegistryError> {
        ids.iter().map(|&id| self.get_object(id, kind)).collect()
    }

    /// Kind-checked existence check for `id`, without cloning the full
    /// record the way [`Self::get_object`] does — the object manager's half
    /// of `getHandle` (`spec.md` §4.B); the facade pairs a successful result
    /// with the `Arc<Shared>` it holds to build the actual [`crate::id::Handle`].
    pub fn get_handle(&self, id: Id, kind: EntityKind) -> Result<(), RegistryError> {
        match self.get_entity(id, kind) {
            Some(entity) if entity.kind() == kind => Ok(()),
            Some(entity) => Err(RegistryError::KindMismatch {
                id,
                expected: kind,
                found: entity.kind(),
            }),
            None => Err(RegistryError::StaleHandle { id, kind }),
        }
    }

    pub fn get_handles(&self, ids: &[Id], kind: EntityKind) -> Result<(), RegistryError> {
        ids.iter().try_for_each(|&id| self.get_handle(id, kind))
    }

    pub fn extension_point_id_for_unique(&self, unique_id: &str) -> Option<Id> {
        if self.pending_point_removal.contains(unique_id) {
            return None;
        }
        self.unique_id_index.get(unique_id).copied()
    }

    /// Records that a point's removal has been logically committed (delta
    /// recorded, owning namespace already unlinked). Call before physical
    /// cleanup runs so lookups stop resolving the soon-to-be-destroyed row.
    pub(crate) fn mark_extension_point_removed(&mut self, unique_id: SmolStr) {
        self.pending_point_removal.insert(unique_id);
    }

    pub fn namespace(&self, bundle_id: BundleId) -> Option<&NamespaceRecord> {
        self.namespaces.get(&bundle_id)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceRecord> {
        self.namespaces.values()
    }

    pub fn extensions_from(&self, bundle_id: BundleId) -> &[Id] {
        self.extensions_from_bundle
            .get(&bundle_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn extension_points_from(&self, bundle_id: BundleId) -> &[Id] {
        self.extension_points_from_bundle
            .get(&bundle_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn stats(&self) -> ObjectManagerStats {
        ObjectManagerStats {
            extension_points: self.extension_points.lock().len().max(
                self.cold
                    .index
                    .values()
                    .filter(|e| e.kind == EntityKind::ExtensionPoint)
                    .count(),
            ),
            extensions: self.extensions.lock().len().max(
                self.cold
                    .index
                    .values()
                    .filter(|e| e.kind == EntityKind::Extension)
                    .count(),
            ),
            configuration_elements: self.config_elements.lock().len(),
            orphans: self.orphans.values().map(|v| v.len()).sum(),
            namespaces: self.namespaces.len(),
        }
    }

    // ---- orphan table (used by the resolver) -------------------------------

    pub fn orphans_for(&self, target: &str) -> &[Id] {
        self.orphans
            .get(target)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn take_orphans(&mut self, target: &str) -> Vec<Id> {
        self.orphans.remove(target).unwrap_or_default()
    }

    pub(crate) fn push_orphan(&mut self, target: SmolStr, id: Id) {
        self.orphans.entry(target).or_default().push(id);
    }

    pub(crate) fn remove_orphan(&mut self, target: &str, id: Id) {
        if let Some(list) = self.orphans.get_mut(target) {
            list.retain(|&x| x != id);
            if list.is_empty() {
                self.orphans.remove(target);
            }
        }
    }

    pub(crate) fn extension_point_mut(&self, id: Id) -> Option<ExtensionPointRecord> {
        self.get_entity(id, EntityKind::ExtensionPoint)
            .and_then(|e| match e {
                Entity::ExtensionPoint(rec) => Some(rec),
                _ => None,
            })
    }

    pub(crate) fn set_extension_point_children(&mut self, id: Id, children: Vec<Id>) {
        // Materialize first (in case still cold), then mutate hot.
        self.get_entity(id, EntityKind::ExtensionPoint);
        if let Some(rec) = self.extension_points.lock().get_mut(&id) {
            rec.raw_children = children;
        }
        self.dirty = true;
    }

    pub(crate) fn extension(&self, id: Id) -> Option<ExtensionRecord> {
        self.get_entity(id, EntityKind::Extension).and_then(|e| match e {
            Entity::Extension(rec) => Some(rec),
            _ => None,
        })
    }

    // ---- mutation (§4.B, §4.D) --------------------------------------------

    /// Inserts a namespace and its contained extension/point records.
    /// Does **not** resolve links — that is the resolver's job.
    pub fn add_namespace(&mut self, ns: NamespaceInput) -> Result<BundleId, IngestError> {
        for ext in &ns.extensions {
            if ext.extension_point_identifier.is_none() {
                return Err(IngestError::MissingExtensionPointIdentifier {
                    bundle_id: ns.bundle_id,
                    simple_identifier: ext.simple_identifier.clone(),
                });
            }
        }
        // Rejecting a clash against `unique_id_index` up front (rather than
        // just `pending_point_removal`) also covers a point whose removal
        // was recorded but hasn't reached physical cleanup yet: the row
        // still occupies that id until cleanup runs, so a second namespace
        // claiming the same identifier in the meantime would otherwise let
        // the lagging cleanup job tear down the wrong (new) row.
        for point in &ns.extension_points {
            if self.unique_id_index.contains_key(point.unique_identifier.as_str()) {
                return Err(IngestError::DuplicateExtensionPointIdentifier {
                    bundle_id: ns.bundle_id,
                    unique_identifier: point.unique_identifier.clone(),
                });
            }
        }

        let mut extension_point_ids = Vec::with_capacity(ns.extension_points.len());
        for point in &ns.extension_points {
            let id = self.alloc_id();
            let rec = ExtensionPointRecord {
                id,
                bundle_id: ns.bundle_id,
                unique_identifier: point.unique_identifier.clone(),
                simple_identifier: point.simple_identifier.clone(),
                schema_reference: point.schema_reference.clone(),
                label: point.label.clone(),
                raw_children: Vec::new(),
            };
            self.unique_id_index.insert(rec.unique_identifier.clone(), id);
            self.extension_points.lock().insert(id, rec);
            extension_point_ids.push(id);
        }

        let mut extension_ids = Vec::with_capacity(ns.extensions.len());
        for ext in &ns.extensions {
            let id = self.alloc_id();
            let children = ext
                .children
                .iter()
                .map(|c| self.insert_config_tree(c, id, EntityKind::Extension))
                .collect();
            let rec = ExtensionRecord {
                id,
                bundle_id: ns.bundle_id,
                simple_identifier: ext.simple_identifier.clone(),
                extension_point_identifier: ext.extension_point_identifier.clone().unwrap(),
                label: ext.label.clone(),
                namespace: ns.bundle_id,
                raw_children: children,
            };
            self.extensions.lock().insert(id, rec);
            extension_ids.push(id);
        }

        self.namespaces.insert(
            ns.bundle_id,
            NamespaceRecord {
                bundle_id: ns.bundle_id,
                unique_identifier: ns.unique_identifier,
                extension_point_ids: extension_point_ids.clone(),
                extension_ids: extension_ids.clone(),
            },
        );
        self.extension_points_from_bundle
            .insert(ns.bundle_id, extension_point_ids);
        self.extensions_from_bundle
            .insert(ns.bundle_id, extension_ids);
        self.dirty = true;
        Ok(ns.bundle_id)
    }

    fn insert_config_tree(
        &mut self,
        input: &ConfigurationElementInput,
        parent_id: Id,
        parent_kind: EntityKind,
    ) -> Id {
        let id = self.alloc_id();
        let children = input
            .children
            .iter()
            .map(|c| self.insert_config_tree(c, id, EntityKind::ConfigurationElement))
            .collect();
        let extra_data_offset = if let Some(extra) = &input.extra {
            self.extras.insert(id, extra.clone());
            Some(0) // a real offset is assigned on save; 0 marks "has extras" pre-save
        } else {
            None
        };
        let rec = ConfigurationElementRecord {
            id,
            name: input.name.clone(),
            value: input.value.clone(),
            attributes: input.attributes.clone(),
            parent_id,
            parent_kind,
            raw_children: children,
            extra_data_offset,
        };
        self.config_elements.lock().insert(id, rec);
        id
    }

    /// Removes a single row. `dispose_deep` indicates dependent rows (e.g. a
    /// configuration-element subtree) have already been collected by the
    /// caller for individual removal, so this call only removes `id` itself.
    pub fn remove(&mut self, id: Id, kind: EntityKind, _dispose_deep: bool) {
        match kind {
            EntityKind::ExtensionPoint => {
                if let Some(rec) = self.extension_points.lock().remove(&id) {
                    self.unique_id_index.remove(rec.unique_identifier.as_str());
                }
                self.cold.index.remove(&id);
            }
            EntityKind::Extension => {
                self.extensions.lock().remove(&id);
                self.cold.index.remove(&id);
            }
            EntityKind::ConfigurationElement | EntityKind::ThirdLevelConfigurationElement => {
                self.config_elements.lock().remove(&id);
                self.extras.remove(&id);
                self.cold.index.remove(&id);
            }
        }
        self.dirty = true;
    }

    /// Removes an extension point. Any extension still linked into its
    /// `raw_children` is re-orphaned rather than dropped; normally the
    /// resolver has already unlinked all children by the time this runs, so
    /// this is a defensive backstop rather than the common case (I1).
    pub fn remove_extension_point(&mut self, unique_id: &str) -> Option<ExtensionPointRecord> {
        self.pending_point_removal.remove(unique_id);
        let id = self.unique_id_index.remove(unique_id)?;
        let rec = self.extension_points.lock().remove(&id);
        self.cold.index.remove(&id);
        self.dirty = true;
        if let Some(rec) = &rec {
            for &extension_id in &rec.raw_children {
                self.push_orphan(rec.unique_identifier.clone(), extension_id);
            }
        }
        rec
    }

    pub fn remove_namespace(&mut self, bundle_id: BundleId) -> Option<NamespaceRecord> {
        self.extensions_from_bundle.remove(&bundle_id);
        self.extension_points_from_bundle.remove(&bundle_id);
        self.dirty = true;
        self.namespaces.remove(&bundle_id)
    }

    /// Collects the transitive closure of a configuration-element subtree's
    /// ids (used by the dispatcher's deferred physical cleanup, §4.F).
    pub fn config_subtree(&self, root: Id) -> Vec<(Id, EntityKind)> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let rec = self
                .config_elements
                .lock()
                .get(&id)
                .cloned()
                .or_else(|| self.get_entity(id, EntityKind::ConfigurationElement).and_then(|e| match e {
                    Entity::ConfigurationElement(r) => Some(r),
                    _ => None,
                }))
                .or_else(|| self.get_entity(id, EntityKind::ThirdLevelConfigurationElement).and_then(|e| match e {
                    Entity::ConfigurationElement(r) => Some(r),
                    _ => None,
                }));
            let Some(rec) = rec else { continue };
            out.push((id, rec.kind()));
            stack.extend(rec.raw_children.iter().copied());
        }
        out
    }

    /// Builds an owned snapshot for the cache writer. Call
    /// [`Self::materialize_all`] first so cold rows this manager never
    /// touched are still included.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            extension_points: self.extension_points.lock().clone(),
            extensions: self.extensions.lock().clone(),
            config_elements: self.config_elements.lock().clone(),
            extras: self.extras.clone(),
            namespaces: self.namespaces.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ExtensionPointInput;

    #[test]
    fn add_namespace_allocates_monotonic_ids() {
        let mut mgr = ObjectManager::new();
        let ns = NamespaceInput {
            bundle_id: 1,
            unique_identifier: Some("bundle.a".into()),
            extension_points: vec![ExtensionPointInput {
                unique_identifier: "x.p".into(),
                simple_identifier: "p".into(),
                schema_reference: None,
                label: None,
            }],
            extensions: vec![],
        };
        mgr.add_namespace(ns).unwrap();
        assert_eq!(mgr.extension_point_id_for_unique("x.p"), Some(1));
        assert_eq!(mgr.next_id, 2);
    }

    #[test]
    fn missing_extension_point_identifier_is_rejected() {
        let mut mgr = ObjectManager::new();
        let ns = NamespaceInput {
            bundle_id: 1,
            unique_identifier: None,
            extension_points: vec![],
            extensions: vec![crate::ingest::ExtensionInput {
                simple_identifier: None,
                extension_point_identifier: None,
                label: None,
                children: vec![],
            }],
        };
        assert!(mgr.add_namespace(ns).is_err());
    }

    #[test]
    fn duplicate_extension_point_identifier_is_rejected() {
        let mut mgr = ObjectManager::new();
        let point = ExtensionPointInput {
            unique_identifier: "x.p".into(),
            simple_identifier: "p".into(),
            schema_reference: None,
            label: None,
        };
        mgr.add_namespace(NamespaceInput {
            bundle_id: 1,
            unique_identifier: Some("bundle.a".into()),
            extension_points: vec![point.clone()],
            extensions: vec![],
        })
        .unwrap();

        let err = mgr
            .add_namespace(NamespaceInput {
                bundle_id: 2,
                unique_identifier: Some("bundle.b".into()),
                extension_points: vec![point],
                extensions: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            crate::ingest::IngestError::DuplicateExtensionPointIdentifier {
                bundle_id: 2,
                unique_identifier: "x.p".into(),
            }
        );
        // Rejected atomically: bundle 2 must not have been partially ingested.
        assert!(mgr.namespace(2).is_none());
    }
}
