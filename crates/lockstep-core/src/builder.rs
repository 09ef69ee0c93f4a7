//! Shared tree construction, parameterized by format-specific extraction
//! rules.
//!
//! Both readers are the same depth-first expansion over a [`LockSource`]:
//! at each position, every declared dependency is resolved to the nearest
//! satisfying occurrence visible from that position (walking outward toward
//! the root, first match wins), and identical name+locator revisits reuse
//! the existing arena node instead of re-descending. That short-circuit is
//! what bounds recursion over mutually-referencing packages.

use crate::manifest::Manifest;
use crate::tree::{DepKind, Edge, Locator, LogicalTree, NodeId};
use semver::{Version, VersionReq};
use thiserror::Error;

/// Errors that can occur while assembling the logical tree.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A manifest-declared dependency has no entry in the resolution table.
    #[error("malformed lock: no entry for manifest dependency '{name}@{range}'")]
    MalformedLock { name: String, range: String },

    /// A resolution entry's sub-dependency references a name with no
    /// satisfying entry reachable from its position.
    #[error(
        "unresolved reference: '{name}@{range}' required by '{required_by}' \
         has no satisfying entry"
    )]
    UnresolvedReference {
        name: String,
        range: String,
        required_by: String,
    },
}

/// One declared sub-dependency of a resolution record.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Dependency name.
    pub name: String,
    /// Declared range or locator string.
    pub range: String,
    /// Kind the record declares for this edge.
    pub kind: DepKind,
}

/// A resolution record in format-agnostic form, produced by a
/// [`LockSource`] when an occurrence is located.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// What the occurrence resolved to.
    pub locator: Locator,
    /// Content hash, carried through unchanged when present.
    pub integrity: Option<String>,
    /// Source pointer, carried through unchanged when present.
    pub resolved: Option<String>,
    /// The record's own declared sub-dependencies.
    pub requires: Vec<Requirement>,
}

/// Format-specific extraction rules for one lock format's decoded
/// structure. `Pos` identifies a position in the source's own encoding
/// (trivial for the flat format, an entry path for the nested one) so
/// lookups can search at-or-above the requiring record.
pub trait LockSource {
    type Pos: Clone;

    /// The position of the top-level resolution table.
    fn root_position(&self) -> Self::Pos;

    /// Locate the occurrence of `name` satisfying `range` that is nearest
    /// to `at`, together with the position the occurrence itself occupies.
    fn resolve(&self, name: &str, range: &str, at: &Self::Pos) -> Option<(SourceEntry, Self::Pos)>;
}

/// Assemble a logical tree from a manifest and a lock source.
///
/// # Errors
///
/// Fails with [`BuildError::MalformedLock`] when a manifest-declared
/// dependency has no entry, and [`BuildError::UnresolvedReference`] when a
/// record's sub-dependency cannot be located from its position.
pub fn build<S: LockSource>(manifest: &Manifest, source: &S) -> Result<LogicalTree, BuildError> {
    let root_locator = manifest
        .version
        .as_deref()
        .and_then(|v| Version::parse(v).ok())
        .map_or_else(
            || Locator::Version(Version::new(0, 0, 0)),
            Locator::Version,
        );
    let mut builder = Builder {
        source,
        tree: LogicalTree::new(manifest.name.as_deref().unwrap_or(""), root_locator),
    };

    let root = builder.tree.root();
    let at = source.root_position();
    for (name, (range, kind)) in manifest.root_dependencies() {
        let child = builder.descend(&name, &range, &at, None)?;
        builder.tree.node_mut(root).dependencies.insert(
            name,
            Edge {
                range,
                node: child,
                kind,
            },
        );
    }
    Ok(builder.tree)
}

struct Builder<'a, S: LockSource> {
    source: &'a S,
    tree: LogicalTree,
}

impl<S: LockSource> Builder<'_, S> {
    fn descend(
        &mut self,
        name: &str,
        range: &str,
        at: &S::Pos,
        required_by: Option<&str>,
    ) -> Result<NodeId, BuildError> {
        let Some((entry, pos)) = self.source.resolve(name, range, at) else {
            return Err(match required_by {
                None => BuildError::MalformedLock {
                    name: name.to_string(),
                    range: range.to_string(),
                },
                Some(parent) => BuildError::UnresolvedReference {
                    name: name.to_string(),
                    range: range.to_string(),
                    required_by: parent.to_string(),
                },
            });
        };

        if let Some(id) = self.tree.lookup(name, &entry.locator) {
            return Ok(id);
        }

        let id = self
            .tree
            .intern(name.to_string(), entry.locator, entry.integrity, entry.resolved);
        for req in entry.requires {
            let child = self.descend(&req.name, &req.range, &pos, Some(name))?;
            self.tree.node_mut(id).dependencies.insert(
                req.name,
                Edge {
                    range: req.range,
                    node: child,
                    kind: req.kind,
                },
            );
        }
        Ok(id)
    }
}

/// Parse a declared range, treating bare versions as caret requirements.
/// Returns `None` for locator strings and anything else semver cannot read.
pub(crate) fn parse_range(range: &str) -> Option<VersionReq> {
    if Locator::non_registry(range).is_some() {
        return None;
    }
    let normalized = if range.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("^{range}")
    } else {
        range.to_string()
    };
    VersionReq::parse(&normalized).ok()
}
