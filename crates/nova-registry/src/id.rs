//! Identifier and handle layer (Component A).
//!
//! Every entity in the registry carries a stable `i32` id, monotonically
//! assigned within a registry's lifetime (`spec.md` invariant I2), tagged by
//! an [`EntityKind`]. A [`Handle`] is a lightweight `(id, kind)` pair plus a
//! reference to the registry it was issued from; resolving it returns a
//! snapshot of the live entity, faulting cold cache rows in as needed.

use crate::error::RegistryError;
use crate::model::Entity;
use crate::registry::Shared;
use std::sync::Arc;

/// Bundle (namespace-owning unit) identifier. Supplied by the host; opaque
/// to the core beyond equality and use as a map key.
pub type BundleId = i64;

/// Stable per-entity identifier, monotonically assigned (spec I2).
pub type Id = i32;

/// Tag distinguishing the four entity kinds stored in the object manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntityKind {
    ExtensionPoint = 0,
    Extension = 1,
    ConfigurationElement = 2,
    ThirdLevelConfigurationElement = 3,
}

impl EntityKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::ExtensionPoint),
            1 => Some(Self::Extension),
            2 => Some(Self::ConfigurationElement),
            3 => Some(Self::ThirdLevelConfigurationElement),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A typed, kind-tagged reference that resolves lazily against the object
/// manager it was issued from.
///
/// Handle equality is by `(id, kind)` alone, per `spec.md` §4.A. Handles
/// bind to their registry at creation (design note in `spec.md` §9) rather
/// than reading a process-global slot, so multiple registries can coexist in
/// tests.
#[derive(Clone)]
pub struct Handle {
    pub(crate) id: Id,
    pub(crate) kind: EntityKind,
    pub(crate) shared: Arc<Shared>,
}

impl Handle {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Resolve this handle to a snapshot of the live entity.
    ///
    /// Faults in a cold cache row on first access (the hot table then
    /// shadows it for subsequent reads). Fails with
    /// [`RegistryError::StaleHandle`] if the id was physically removed.
    pub fn resolve(&self) -> Result<Entity, RegistryError> {
        let manager = self.shared.manager.read();
        manager
            .get_entity(self.id, self.kind)
            .ok_or(RegistryError::StaleHandle {
                id: self.id,
                kind: self.kind,
            })
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind
    }
}
impl Eq for Handle {}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
