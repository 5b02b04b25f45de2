//! Registry Facade (Component H, `spec.md` §4.H) and the concurrency
//! envelope (Component G, §4.G / §5) that backs it.
//!
//! [`Shared`] is the one heap-allocated block every [`Handle`] and listener
//! closure holds a reference to: the write-lock-guarded object manager, the
//! listener list (its own independent mutex, per §5's "shared resource
//! policy"), the dispatch queue's sender, and the delta accumulator that's
//! alive only for the duration of a mutation. [`ExtensionRegistry`] is the
//! cheap, `Clone`-able handle callers actually hold.

use crate::cache::{CachePaths, CacheSnapshot};
use crate::config::RegistryConfig;
use crate::delta::DeltaAccumulator;
use crate::dispatch::{DispatchJob, Dispatcher};
use crate::error::RegistryError;
use crate::id::{BundleId, EntityKind, Handle, Id};
use crate::ingest::NamespaceInput;
use crate::listener::{DispatchStatus, ListenerEntry, RegistryChangeListener};
use crate::model::{Entity, ExtensionRecord};
use crate::object_manager::{ObjectManager, ObjectManagerStats};
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) struct Shared {
    pub(crate) manager: RwLock<ObjectManager>,
    listeners: Mutex<Vec<ListenerEntry>>,
    dispatcher: Dispatcher,
}

/// Logs every dispatched delta at `debug!`, installed automatically when
/// [`RegistryConfig::debug_listener`] is set (`SPEC_FULL.md` §2, component L).
struct DebugListener;

impl RegistryChangeListener for DebugListener {
    fn changed(&self, event: &crate::listener::RegistryChangeEvent) {
        for (bundle_id, delta) in event.deltas() {
            tracing::debug!(target: "nova.registry", bundle_id, ?delta, "registry delta");
        }
    }
}

/// Public handle to a live registry. Cheap to clone; every clone shares the
/// same underlying state.
#[derive(Clone)]
pub struct ExtensionRegistry {
    shared: Arc<Shared>,
    cache_paths: CachePaths,
}

impl ExtensionRegistry {
    /// Starts a fresh registry, attempting to fault in from the on-disk
    /// cache at `cache_paths` unless `config.no_registry_cache` is set.
    pub fn start(cache_paths: CachePaths, expected_stamp: i64, config: RegistryConfig) -> Self {
        let mut manager = ObjectManager::new();
        if !config.no_registry_cache {
            // §6: "A configuration flag disables stamp checking (stamp=0
            // matches any)" — `check_config` is that flag; when it's off the
            // caller's `expected_stamp` is never consulted.
            let expected_stamp = if config.check_config { expected_stamp } else { 0 };
            let namespace_path = cache_paths.namespace.clone();
            manager.init(
                &cache_paths,
                expected_stamp,
                &namespace_path,
                !config.no_lazy_cache_loading,
            );
        }

        let shared = Arc::new(Shared {
            manager: RwLock::new(manager),
            listeners: Mutex::new(Vec::new()),
            dispatcher: Dispatcher::spawn(),
        });

        let registry = Self { shared, cache_paths };
        if config.debug_listener {
            registry.add_registry_change_listener(Arc::new(DebugListener), None);
        }
        registry
    }

    fn handle(&self, id: Id, kind: EntityKind) -> Handle {
        Handle {
            id,
            kind,
            shared: self.shared.clone(),
        }
    }

    // ---- queries (§4.H, take the read lock) --------------------------------

    pub fn get_extension_point(&self, id: Id) -> Option<Handle> {
        let manager = self.shared.manager.read();
        manager
            .get_entity(id, EntityKind::ExtensionPoint)
            .map(|_| self.handle(id, EntityKind::ExtensionPoint))
    }

    pub fn get_extension_point_by_unique_id(&self, unique_id: &str) -> Option<Handle> {
        let manager = self.shared.manager.read();
        let id = manager.extension_point_id_for_unique(unique_id)?;
        Some(self.handle(id, EntityKind::ExtensionPoint))
    }

    pub fn get_extension_points(&self) -> Vec<Handle> {
        let manager = self.shared.manager.read();
        manager
            .namespaces()
            .flat_map(|ns| ns.extension_point_ids.iter().copied())
            .map(|id| self.handle(id, EntityKind::ExtensionPoint))
            .collect()
    }

    pub fn get_extension_points_for_namespace(&self, bundle_id: BundleId) -> Vec<Handle> {
        let manager = self.shared.manager.read();
        manager
            .extension_points_from(bundle_id)
            .iter()
            .map(|&id| self.handle(id, EntityKind::ExtensionPoint))
            .collect()
    }

    /// Single-result lookup: the extension point `bundle_id` declares under
    /// `simple_id`, distinct from [`Self::get_extension_points_for_namespace`]'s
    /// full collection (`SPEC_FULL.md` §4.H's `getExtensionPoint(namespace,
    /// simpleId)`).
    pub fn get_extension_point_for_namespace(&self, bundle_id: BundleId, simple_id: &str) -> Option<Handle> {
        let manager = self.shared.manager.read();
        find_point_by_simple_id(&manager, bundle_id, simple_id)
            .map(|id| self.handle(id, EntityKind::ExtensionPoint))
    }

    pub fn get_extension(&self, id: Id) -> Option<Handle> {
        let manager = self.shared.manager.read();
        manager
            .get_entity(id, EntityKind::Extension)
            .map(|_| self.handle(id, EntityKind::Extension))
    }

    /// Finds an extension linked into the extension point `point_id` by its
    /// local `extension_id`.
    pub fn get_extension_in_point(&self, point_id: Id, extension_id: Id) -> Option<Handle> {
        let manager = self.shared.manager.read();
        let point = manager.extension_point_mut(point_id)?;
        point
            .raw_children
            .iter()
            .copied()
            .find(|&id| id == extension_id)
            .map(|id| self.handle(id, EntityKind::Extension))
    }

    /// Dotted convenience lookup: `namespace.simpleId.extensionId`
    /// (`SPEC_FULL.md` §4, "getAssociatedNamespace/getContributor-style
    /// lookup").
    pub fn get_extension_for(
        &self,
        namespace: BundleId,
        extension_point_simple_id: &str,
        extension_id: &str,
    ) -> Option<Handle> {
        let manager = self.shared.manager.read();
        let point_id = find_point_by_simple_id(&manager, namespace, extension_point_simple_id)?;
        let point = manager.extension_point_mut(point_id)?;
        point.raw_children.iter().copied().find_map(|id| {
            let ext = manager.extension(id)?;
            (ext.simple_identifier.as_deref() == Some(extension_id))
                .then(|| self.handle(id, EntityKind::Extension))
        })
    }

    pub fn get_extensions(&self, bundle_id: BundleId) -> Vec<Handle> {
        let manager = self.shared.manager.read();
        manager
            .extensions_from(bundle_id)
            .iter()
            .map(|&id| self.handle(id, EntityKind::Extension))
            .collect()
    }

    /// Walks the declared configuration-element tree of `extension_id`, in
    /// declaration order (top level only; recurse via `Handle::resolve` on
    /// each child for deeper levels).
    pub fn get_configuration_elements_for(&self, extension_id: Id) -> Result<Vec<Handle>, RegistryError> {
        let manager = self.shared.manager.read();
        let ext = match manager.get_object(extension_id, EntityKind::Extension)? {
            Entity::Extension(rec) => rec,
            _ => unreachable!("get_object already kind-checked"),
        };
        Ok(ext
            .raw_children
            .iter()
            .map(|&id| {
                let kind = manager
                    .get_entity(id, EntityKind::ConfigurationElement)
                    .or_else(|| manager.get_entity(id, EntityKind::ThirdLevelConfigurationElement))
                    .map(|e| e.kind())
                    .unwrap_or(EntityKind::ConfigurationElement);
                self.handle(id, kind)
            })
            .collect())
    }

    /// Aggregates configuration elements across every extension currently
    /// linked into extension point `point_id`, in extension-then-declaration
    /// order (`SPEC_FULL.md` §4.H's point-scoped `getConfigurationElementsFor`,
    /// distinct from [`Self::get_configuration_elements_for`]'s single-extension
    /// version).
    pub fn get_configuration_elements_for_point(&self, point_id: Id) -> Result<Vec<Handle>, RegistryError> {
        let manager = self.shared.manager.read();
        let point = match manager.get_object(point_id, EntityKind::ExtensionPoint)? {
            Entity::ExtensionPoint(rec) => rec,
            _ => unreachable!("get_object already kind-checked"),
        };
        let mut out = Vec::new();
        for &extension_id in &point.raw_children {
            let ext = match manager.get_object(extension_id, EntityKind::Extension)? {
                Entity::Extension(rec) => rec,
                _ => unreachable!("get_object already kind-checked"),
            };
            for &id in &ext.raw_children {
                let kind = manager
                    .get_entity(id, EntityKind::ConfigurationElement)
                    .or_else(|| manager.get_entity(id, EntityKind::ThirdLevelConfigurationElement))
                    .map(|e| e.kind())
                    .unwrap_or(EntityKind::ConfigurationElement);
                out.push(self.handle(id, kind));
            }
        }
        Ok(out)
    }

    /// Namespace+simpleId-scoped convenience over
    /// [`Self::get_configuration_elements_for_point`]: resolves the point
    /// first, returning an empty list when `bundle_id` declares no such point
    /// (mirrors [`Self::get_extension_point_for_namespace`]'s `None` case
    /// rather than erroring, since "no point" isn't a kind mismatch or a
    /// stale handle).
    pub fn get_configuration_elements_for_namespace(
        &self,
        bundle_id: BundleId,
        extension_point_simple_id: &str,
    ) -> Result<Vec<Handle>, RegistryError> {
        let point_id = {
            let manager = self.shared.manager.read();
            find_point_by_simple_id(&manager, bundle_id, extension_point_simple_id)
        };
        match point_id {
            Some(id) => self.get_configuration_elements_for_point(id),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_namespaces(&self) -> Vec<BundleId> {
        let manager = self.shared.manager.read();
        manager.namespaces().map(|ns| ns.bundle_id).collect()
    }

    pub fn namespace_unique_id(&self, bundle_id: BundleId) -> Option<SmolStr> {
        self.shared
            .manager
            .read()
            .namespace(bundle_id)
            .and_then(|ns| ns.unique_identifier.clone())
    }

    /// Bulk kind-checked resolve, mirroring §4.B's `getObjects(ids, kind)`.
    pub fn get_objects(&self, ids: &[Id], kind: EntityKind) -> Result<Vec<Entity>, RegistryError> {
        self.shared.manager.read().get_objects(ids, kind)
    }

    /// Kind-checked handle construction, mirroring §4.B's `getHandle(id,
    /// kind)` — as strictly checked as [`Self::get_objects`], but returns a
    /// lazy [`Handle`] rather than an already-resolved [`Entity`].
    pub fn get_handle(&self, id: Id, kind: EntityKind) -> Result<Handle, RegistryError> {
        self.shared.manager.read().get_handle(id, kind)?;
        Ok(self.handle(id, kind))
    }

    /// Bulk kind-checked handle construction, mirroring §4.B's
    /// `getHandles(ids, kind)`.
    pub fn get_handles(&self, ids: &[Id], kind: EntityKind) -> Result<Vec<Handle>, RegistryError> {
        self.shared.manager.read().get_handles(ids, kind)?;
        Ok(ids.iter().map(|&id| self.handle(id, kind)).collect())
    }

    /// Extensions currently sitting in the orphan table under `target`
    /// (unresolved because no resident extension point claims that
    /// identifier), per §3's orphan table.
    pub fn orphans_for(&self, target: &str) -> Vec<Id> {
        self.shared.manager.read().orphans_for(target).to_vec()
    }

    pub fn stats(&self) -> ObjectManagerStats {
        self.shared.manager.read().stats()
    }

    // ---- listener registration (§4.H, §5: own mutex, not the monitor) -----

    pub fn add_registry_change_listener(
        &self,
        listener: Arc<dyn RegistryChangeListener>,
        filter: Option<BundleId>,
    ) {
        self.shared
            .listeners
            .lock()
            .push(ListenerEntry { listener, filter });
    }

    pub fn remove_registry_change_listener(&self, listener: &Arc<dyn RegistryChangeListener>) {
        self.shared
            .listeners
            .lock()
            .retain(|entry| !Arc::ptr_eq(&entry.listener, listener));
    }

    // ---- mutations (§4.H, take the write lock) -----------------------------

    /// Adds a single namespace: ingest, link, schedule dispatch.
    pub fn add(&self, ns: NamespaceInput) -> Result<BundleId, RegistryError> {
        self.add_all(vec![ns])
    }

    /// Adds several namespaces atomically under one write-lock acquisition,
    /// producing one dispatch job covering all of them.
    pub fn add_all(&self, namespaces: Vec<NamespaceInput>) -> Result<BundleId, RegistryError> {
        let (bundle_id, deltas) = self.add_all_inner(namespaces)?;
        self.fire(deltas, None);
        Ok(bundle_id)
    }

    /// Unresolves `bundle_id`: unlinks its extensions/points (orphaning any
    /// that belong to other, still-resident namespaces), removes the
    /// namespace record, and schedules a dispatch for the deltas.
    pub fn remove(&self, bundle_id: BundleId) {
        let deltas = self.remove_inner(bundle_id);
        // §4.F: if nobody is listening, a dispatch job still has to run so
        // physical cleanup happens; `fire` installs a throwaway listener for
        // exactly that case.
        self.fire(deltas, None);
    }

    /// Test-only variant of [`Self::add_all`] that waits for the resulting
    /// dispatch job to finish before returning, so assertions can observe
    /// post-dispatch state (physical cleanup, listener delivery) deterministically.
    #[doc(hidden)]
    pub async fn add_all_and_wait(
        &self,
        namespaces: Vec<NamespaceInput>,
    ) -> Result<(BundleId, DispatchStatus), RegistryError> {
        let (bundle_id, deltas) = self.add_all_inner(namespaces)?;
        let (tx, rx) = oneshot::channel();
        self.fire(deltas, Some(tx));
        Ok((bundle_id, rx.await.unwrap_or_default()))
    }

    /// Test-only variant of [`Self::remove`] that waits for dispatch to finish.
    #[doc(hidden)]
    pub async fn remove_and_wait(&self, bundle_id: BundleId) -> DispatchStatus {
        let deltas = self.remove_inner(bundle_id);
        let (tx, rx) = oneshot::channel();
        self.fire(deltas, Some(tx));
        rx.await.unwrap_or_default()
    }

    fn add_all_inner(
        &self,
        namespaces: Vec<NamespaceInput>,
    ) -> Result<(BundleId, DeltaAccumulator), RegistryError> {
        let mut deltas = DeltaAccumulator::new();
        let mut last_bundle_id = 0;
        {
            let mut manager = self.shared.manager.write();
            let listeners_present = !self.shared.listeners.lock().is_empty();
            for ns in namespaces {
                let bundle_id = manager.add_namespace(ns)?;
                crate::resolver::link_namespace(&mut manager, bundle_id, &mut deltas, listeners_present)?;
                last_bundle_id = bundle_id;
            }
        }
        Ok((last_bundle_id, deltas))
    }

    fn remove_inner(&self, bundle_id: BundleId) -> DeltaAccumulator {
        let mut deltas = DeltaAccumulator::new();
        let mut manager = self.shared.manager.write();
        crate::resolver::unlink_namespace(&mut manager, bundle_id, &mut deltas);
        manager.remove_namespace(bundle_id);
        deltas
    }

    /// Schedules a dispatch job for `deltas` and returns without waiting for
    /// it to run. `result_tx` lets tests observe completion deterministically.
    fn fire(&self, mut deltas: DeltaAccumulator, result_tx: Option<oneshot::Sender<DispatchStatus>>) {
        // Nothing changed: don't schedule a job at all, for any caller. A
        // dropped `result_tx` resolves its paired `oneshot::Receiver` with an
        // error, which `_and_wait` callers turn into a default (successful,
        // empty) `DispatchStatus` via `unwrap_or_default`.
        if deltas.is_empty() {
            return;
        }
        let snapshot = deltas.take_snapshot();
        let mut listeners = self.shared.listeners.lock().clone();
        if listeners.is_empty() {
            // §4.F: "If remove(bundleId) finds the listener list empty, it
            // temporarily installs a no-op listener so that the dispatch job
            // is actually scheduled and the cleanup phase runs."
            listeners.push(ListenerEntry {
                listener: Arc::new(NoopListener),
                filter: None,
            });
        }
        self.shared.dispatcher.schedule(DispatchJob {
            listeners,
            deltas: Arc::new(snapshot),
            shared: self.shared.clone(),
            result_tx,
        });
    }

    /// Stops the registry, saving the cache unless `no_registry_cache` is
    /// set. Cache errors are swallowed (§7: "Cache errors during `stop()`
    /// are swallowed; the cache is simply not updated").
    pub fn stop(&self, config: &RegistryConfig, stamp: i64) {
        if config.no_registry_cache {
            return;
        }
        let mut manager = self.shared.manager.write();
        if !manager.is_dirty() {
            return;
        }
        manager.materialize_all();
        let snapshot: CacheSnapshot = manager.snapshot();
        if let Err(err) = crate::cache::save_cache(&snapshot, stamp, &self.cache_paths) {
            tracing::warn!(target: "nova.registry.cache", error = %err, "cache save failed; will rebuild on next start");
        }
    }

    /// Walks `element_id`'s parent chain until it reaches an extension, per
    /// §4.A's `declaringExtension` derived lookup.
    pub fn declaring_extension(&self, element_id: Id) -> Result<Handle, RegistryError> {
        let manager = self.shared.manager.read();
        let bound = manager.stats().configuration_elements + manager.stats().extensions + 1;
        let rec = declaring_extension(&manager, element_id, bound)?;
        Ok(self.handle(rec.id, EntityKind::Extension))
    }
}

/// Finds the id of the extension point `bundle_id` declares under
/// `simple_id`, if any. Shared by [`ExtensionRegistry::get_extension_point_for_namespace`],
/// [`ExtensionRegistry::get_extension_for`], and
/// [`ExtensionRegistry::get_configuration_elements_for_namespace`].
fn find_point_by_simple_id(manager: &ObjectManager, bundle_id: BundleId, simple_id: &str) -> Option<Id> {
    manager
        .extension_points_from(bundle_id)
        .iter()
        .copied()
        .find(|&id| {
            manager
                .extension_point_mut(id)
                .is_some_and(|rec| rec.simple_identifier.as_str() == simple_id)
        })
}

struct NoopListener;
impl RegistryChangeListener for NoopListener {
    fn changed(&self, _event: &crate::listener::RegistryChangeEvent) {}
}

/// Walks a configuration element's parent chain until it reaches an
/// `Extension`, per §4.A's `declaringExtension` derived lookup. Bounded by
/// `max_steps` (the live object count is a safe bound); exceeding it means a
/// corrupted parent chain, per the §9 open question (b).
fn declaring_extension(
    manager: &ObjectManager,
    element_id: Id,
    max_steps: usize,
) -> Result<ExtensionRecord, RegistryError> {
    let mut current = element_id;
    let mut kind = EntityKind::ConfigurationElement;
    for _ in 0..max_steps {
        match manager.get_object(current, kind) {
            Ok(Entity::Extension(rec)) => return Ok(rec),
            Ok(Entity::ConfigurationElement(rec)) => {
                current = rec.parent_id;
                kind = rec.parent_kind;
            }
            Ok(Entity::ExtensionPoint(_)) | Err(_) => {
                return Err(RegistryError::OrphanConsistency { id: element_id })
            }
        }
    }
    Err(RegistryError::OrphanConsistency { id: element_id })
}
