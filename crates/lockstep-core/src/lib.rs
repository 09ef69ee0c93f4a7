//! Conversion between the two on-disk representations of a resolved
//! JavaScript dependency graph: the flat, version-keyed lock (yarn.lock v1
//! shape) and the nested, path-keyed lock (package-lock.json v1 shape).
//!
//! This crate provides:
//! - The logical dependency tree, the canonical model both formats lower to
//! - A shared tree builder parameterized by per-format extraction rules
//! - Readers and writers for both formats
//! - A structural equivalence checker used as the conversion fidelity gate
//! - A registry metadata gateway for fields one format omits
//!
//! Version resolution is out of scope: the crate reconstructs the graph a
//! package manager already resolved and re-emits it in the other encoding.

mod builder;
mod convert;
mod equivalence;
mod manifest;
pub mod npm;
pub mod registry;
mod tree;
pub mod yarn;

pub use builder::{build, BuildError, LockSource, Requirement, SourceEntry};
pub use convert::{npm_to_yarn, yarn_to_npm, ConvertError};
pub use equivalence::equivalent;
pub use manifest::{Manifest, ManifestError};
pub use npm::{NpmEntry, PackageLock};
pub use registry::{
    HttpRegistry, MetadataSource, PackageMetadata, RegistryError, StaticMetadata,
};
pub use tree::{DepKind, Edge, Locator, LogicalNode, LogicalTree, NodeId};
pub use yarn::{split_key, YarnEntry, YarnLock};
