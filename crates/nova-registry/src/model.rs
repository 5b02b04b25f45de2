//! Data model (`spec.md` §3).
//!
//! Entities are modeled as a small set of plain records rather than an
//! inheritance hierarchy (design note in `spec.md` §9): every kind shares
//! `id`/`bundle_id`/`raw_children` through the [`RegistryObject`] trait, and
//! [`NestedRegistryModelObject`] adds `name` for the two kinds that carry
//! one. The two configuration-element kinds are a single Rust struct,
//! [`ConfigurationElementRecord`], distinguished only by whether
//! `extra_data_offset` is set.

use crate::id::{BundleId, EntityKind, Id};
use smol_str::SmolStr;

/// A namespace: one dynamically-installed unit's contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRecord {
    pub bundle_id: BundleId,
    /// Dotted unique identifier; anonymous contributors omit this.
    pub unique_identifier: Option<SmolStr>,
    pub extension_point_ids: Vec<Id>,
    pub extension_ids: Vec<Id>,
}

/// A declared socket into which extensions may plug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPointRecord {
    pub id: Id,
    pub bundle_id: BundleId,
    pub unique_identifier: SmolStr,
    pub simple_identifier: SmolStr,
    pub schema_reference: Option<SmolStr>,
    pub label: Option<SmolStr>,
    /// Ordered list of extension ids currently linked into this point.
    pub raw_children: Vec<Id>,
}

/// A contribution targeting an extension point by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub id: Id,
    pub bundle_id: BundleId,
    /// Unique local identifier; may be absent.
    pub simple_identifier: Option<SmolStr>,
    /// The dotted identifier this extension *claims* to target. Resolution
    /// status is derived, not stored: an extension is resolved iff this
    /// identifier is present in the object manager's extension-point index.
    pub extension_point_identifier: SmolStr,
    pub label: Option<SmolStr>,
    pub namespace: BundleId,
    /// Configuration-element ids, in declaration order.
    pub raw_children: Vec<Id>,
}

/// Auxiliary data addressed by `extra_data_offset`, carried in the cache's
/// extras segment: a class-loader-bound executable-factory descriptor and
/// an optional source-location hint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtraData {
    pub executable_factory: Option<SmolStr>,
    pub source_location: Option<SmolStr>,
}

/// A node in the declarative tree carried by an extension.
///
/// When `extra_data_offset` is `Some`, this record is logically a
/// third-level configuration element; tree walks decide which kind to read
/// a child as by inspecting the *parent's* `extra_data_offset`, per
/// `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationElementRecord {
    pub id: Id,
    pub name: SmolStr,
    pub value: Option<SmolStr>,
    /// Interleaved name/value attribute pairs, in declaration order.
    pub attributes: Vec<(SmolStr, SmolStr)>,
    pub parent_id: Id,
    pub parent_kind: EntityKind,
    pub raw_children: Vec<Id>,
    pub extra_data_offset: Option<u64>,
}

impl ConfigurationElementRecord {
    pub fn kind(&self) -> EntityKind {
        if self.extra_data_offset.is_some() {
            EntityKind::ThirdLevelConfigurationElement
        } else {
            EntityKind::ConfigurationElement
        }
    }
}

/// Shared contract for accessing an entity polymorphically, per `spec.md`
/// §4.B ("Records are accessed polymorphically through a shared
/// `RegistryObject` contract").
pub trait RegistryObject {
    fn id(&self) -> Id;
    fn bundle_id(&self) -> BundleId;
    fn raw_children(&self) -> &[Id];
    fn set_raw_children(&mut self, children: Vec<Id>);
}

/// Refines [`RegistryObject`] for kinds that carry a name.
pub trait NestedRegistryModelObject: RegistryObject {
    fn name(&self) -> Option<&str>;
}

impl RegistryObject for ExtensionPointRecord {
    fn id(&self) -> Id {
        self.id
    }
    fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }
    fn raw_children(&self) -> &[Id] {
        &self.raw_children
    }
    fn set_raw_children(&mut self, children: Vec<Id>) {
        self.raw_children = children;
    }
}

impl NestedRegistryModelObject for ExtensionPointRecord {
    fn name(&self) -> Option<&str> {
        Some(self.simple_identifier.as_str())
    }
}

impl RegistryObject for ExtensionRecord {
    fn id(&self) -> Id {
        self.id
    }
    fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }
    fn raw_children(&self) -> &[Id] {
        &self.raw_children
    }
    fn set_raw_children(&mut self, children: Vec<Id>) {
        self.raw_children = children;
    }
}

impl NestedRegistryModelObject for ExtensionRecord {
    fn name(&self) -> Option<&str> {
        self.simple_identifier.as_deref()
    }
}

/// A snapshot returned by [`crate::id::Handle::resolve`]: an owned copy of
/// whichever record kind the handle pointed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    ExtensionPoint(ExtensionPointRecord),
    Extension(ExtensionRecord),
    ConfigurationElement(ConfigurationElementRecord),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::ExtensionPoint(_) => EntityKind::ExtensionPoint,
            Entity::Extension(_) => EntityKind::Extension,
            Entity::ConfigurationElement(rec) => rec.kind(),
        }
    }

    pub fn id(&self) -> Id {
        match self {
            Entity::ExtensionPoint(rec) => rec.id,
            Entity::Extension(rec) => rec.id,
            Entity::ConfigurationElement(rec) => rec.id,
        }
    }

    pub fn bundle_id(&self) -> BundleId {
        match self {
            Entity::ExtensionPoint(rec) => rec.bundle_id,
            Entity::Extension(rec) => rec.bundle_id,
            Entity::ConfigurationElement(_) => {
                // Configuration elements don't carry their own bundle id in
                // the source model; callers needing it walk to the
                // declaring extension via `declaring_extension`.
                0
            }
        }
    }
}
