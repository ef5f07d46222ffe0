//! Fragment model handles, discovery, and roles.
//!
//! A "fragment" is one independently compiled neural network realizing a
//! contiguous slice of the model's forward pass. This module provides:
//! - [`model`] - the opaque compiled-model contract and runtime trait
//! - [`loader`] - directory discovery and ordered instantiation
//! - [`role`] - typed role assignment from declared bindings
//! - [`reference`] - in-process reference fragments for testing

pub mod loader;
pub mod model;
pub mod reference;
pub mod role;

pub use loader::{discover, load_set, natural_cmp, ArtifactMetadata, LoadedSet, Manifest};
pub use model::{
    CompiledModel, Dim, EntryPoint, FunctionSpec, ModelDescriptor, ModelRuntime, TensorMap,
    TensorSpec,
};
pub use reference::{scaffold, ReferenceRuntime, ReferenceSpec, UpdateRecord, REFERENCE_EXTENSION};
pub use role::{assign_block_roles, BlockRole};
