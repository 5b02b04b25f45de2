//! An in-memory, lazily-loaded extension registry: namespaces contribute
//! extension points and extensions, extensions resolve against points by
//! dotted identifier (falling back to an orphan table when the target isn't
//! resident yet), and changes are broadcast through a single serialized
//! dispatch queue before being physically applied.
//!
//! See [`ExtensionRegistry`] for the public surface.

mod cache;
mod config;
mod delta;
mod dispatch;
mod error;
mod id;
mod ingest;
mod listener;
mod model;
mod object_manager;
mod registry;
mod resolver;

pub use cache::{CachePaths, ColdEntry};
pub use config::RegistryConfig;
pub use delta::{DeltaKind, ExtensionDelta, RegistryDelta};
pub use error::{CacheError, RegistryError};
pub use id::{BundleId, EntityKind, Handle, Id};
pub use ingest::{ConfigurationElementInput, ExtensionInput, ExtensionPointInput, IngestError, NamespaceInput};
pub use listener::{DispatchStatus, ListenerFailure, RegistryChangeEvent, RegistryChangeListener};
pub use model::{
    ConfigurationElementRecord, Entity, ExtensionPointRecord, ExtensionRecord, ExtraData,
    NamespaceRecord, NestedRegistryModelObject, RegistryObject,
};
pub use object_manager::ObjectManagerStats;
pub use registry::ExtensionRegistry;
