//! package.json manifest parsing and root-section merging.
//!
//! The manifest is the single source of truth for root-level dependency
//! kinds. Sections are merged under the precedence rule
//! production > optional > development; names listed in the bundled
//! section mark their root edges bundled.

use crate::tree::DepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A package.json manifest, reduced to the fields conversion needs.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Runtime dependencies: name -> declared range or locator string.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Development-only dependencies.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    /// Dependencies that may fail to install.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,

    /// Peer dependencies. Carried for completeness; neither lock format
    /// records a resolution for peers, so they produce no tree edges.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    /// Names shipped inside this package's tarball. npm accepts both
    /// spellings.
    #[serde(
        alias = "bundleDependencies",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub bundled_dependencies: Vec<String>,
}

impl Manifest {
    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error naming the path if the file cannot be read, or a
    /// parse error if it is not valid JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a manifest from a JSON string.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    /// The root dependency set with sections merged under the precedence
    /// rule. A name declared in several sections keeps the declaration of
    /// the strongest one (production wins over optional, optional over
    /// development); a name listed in the bundled section gets a bundled
    /// root edge.
    pub fn root_dependencies(&self) -> BTreeMap<String, (String, DepKind)> {
        let mut merged: BTreeMap<String, (String, DepKind)> = BTreeMap::new();
        for (name, range) in &self.dev_dependencies {
            merged.insert(name.clone(), (range.clone(), DepKind::Development));
        }
        for (name, range) in &self.optional_dependencies {
            merged.insert(name.clone(), (range.clone(), DepKind::Optional));
        }
        for (name, range) in &self.dependencies {
            merged.insert(name.clone(), (range.clone(), DepKind::Production));
        }
        for name in &self.bundled_dependencies {
            if let Some(slot) = merged.get_mut(name) {
                slot.1 = DepKind::Bundled;
            }
        }
        merged
    }
}
