//! realmsync core library: domain types, desired-state loading, configuration.
//!
//! - [`types`]: realm and sub-resource representations, [`TargetName`], [`ResourceKind`]
//! - [`loader`]: YAML/JSON desired-state documents
//! - [`config`]: `~/.realmsync/config.yaml`
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod loader;
pub mod types;

pub use error::CoreError;
pub use loader::LoadedState;
pub use types::{DesiredState, Keyed, RealmRepresentation, ResourceKind, TargetName};
