//! Whole-lock conversion entry points.
//!
//! Each conversion builds the logical tree once from the source structure,
//! lowers it into the target structure, and discards the tree. Nothing is
//! shared across calls, so independent conversions run in parallel without
//! coordination.

use crate::builder::BuildError;
use crate::manifest::Manifest;
use crate::npm::{self, PackageLock};
use crate::registry::{MetadataSource, RegistryError};
use crate::yarn::{self, YarnLock};
use thiserror::Error;

/// Errors surfaced by a conversion. Wrapping is transparent so upstream
/// messages (including registry status text) reach the caller unchanged.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Convert a decoded flat lock into the nested format.
///
/// # Errors
///
/// Fails with a structural error if the lock is internally inconsistent,
/// or a registry error if a required field is missing and cannot be
/// fetched. No partial output is produced.
pub fn yarn_to_npm(
    lock: &YarnLock,
    manifest: &Manifest,
    registry: &dyn MetadataSource,
) -> Result<PackageLock, ConvertError> {
    let tree = yarn::read(lock, manifest)?;
    Ok(npm::write(&tree, manifest, registry)?)
}

/// Convert a decoded nested lock into the flat format.
///
/// # Errors
///
/// Same taxonomy as [`yarn_to_npm`].
pub fn npm_to_yarn(
    lock: &PackageLock,
    manifest: &Manifest,
    registry: &dyn MetadataSource,
) -> Result<YarnLock, ConvertError> {
    let tree = npm::read(lock, manifest)?;
    Ok(yarn::write(&tree, registry)?)
}
