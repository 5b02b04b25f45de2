//! Ingester contract (`spec.md` §6).
//!
//! These are the values the out-of-scope XML manifest parser hands to the
//! core. The core trusts and does not re-validate them (§6): a caller that
//! hands in, say, an extension with a null target identifier gets an error
//! back from [`crate::object_manager::ObjectManager::add_namespace`] rather
//! than having the core silently drop or store it (§4.D, "Tie-breaks and
//! edge cases").

use crate::id::BundleId;
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct NamespaceInput {
    pub bundle_id: BundleId,
    pub unique_identifier: Option<SmolStr>,
    pub extension_points: Vec<ExtensionPointInput>,
    pub extensions: Vec<ExtensionInput>,
}

#[derive(Debug, Clone)]
pub struct ExtensionPointInput {
    pub unique_identifier: SmolStr,
    pub simple_identifier: SmolStr,
    pub schema_reference: Option<SmolStr>,
    pub label: Option<SmolStr>,
}

#[derive(Debug, Clone)]
pub struct ExtensionInput {
    pub simple_identifier: Option<SmolStr>,
    /// The dotted identifier this extension targets. `None` is an ingester
    /// error (§4.D): the core neither stores nor links such an extension.
    pub extension_point_identifier: Option<SmolStr>,
    pub label: Option<SmolStr>,
    pub children: Vec<ConfigurationElementInput>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationElementInput {
    pub name: SmolStr,
    pub value: Option<SmolStr>,
    pub attributes: Vec<(SmolStr, SmolStr)>,
    pub children: Vec<ConfigurationElementInput>,
    /// When present, this element (and only this element) is stored as a
    /// `ThirdLevelConfigurationElement` carrying this extras payload.
    pub extra: Option<crate::model::ExtraData>,
}

/// Raised when `add_namespace` is handed a malformed ingester value.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("extension {simple_identifier:?} in bundle {bundle_id} has no target extension point identifier")]
    MissingExtensionPointIdentifier {
        bundle_id: BundleId,
        simple_identifier: Option<SmolStr>,
    },
    #[error("extension point {unique_identifier} in bundle {bundle_id} duplicates an already-registered unique identifier")]
    DuplicateExtensionPointIdentifier {
        bundle_id: BundleId,
        unique_identifier: SmolStr,
    },
}
