//! Persisted profile: schema, multi-source merge, atomic storage.

pub mod merge;
pub mod schema;
pub mod store;

pub use merge::{
    merge, resolve_stack_name, CliOverrides, EnvOverrides, MergeInputs, ProvenanceMap,
    ResolvedConfiguration, ValueSource,
};
pub use schema::{ProfileDocument, StackMode, SCHEMA_VERSION};
pub use store::{ProfileLock, ProfileStore, DEFAULT_PROFILE};
