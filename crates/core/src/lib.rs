//! Ferry core types: documents, versioned objects, naming rules and the resource registry.

#![forbid(unsafe_code)]

pub mod config;
pub mod document;
pub mod error;
pub mod naming;
pub mod object;
pub mod phase;
pub mod registry;

pub use document::{Document, ResourceRef};
pub use error::{FerryError, FerryResult, LocatorError, StoreError};
pub use object::{merge, VersionedObject};
pub use phase::Phase;
pub use registry::{is_schema_kind, GvkEndpoint, Registry, SCHEMA_KIND};
