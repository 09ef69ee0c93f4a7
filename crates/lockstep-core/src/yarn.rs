//! Format N: the flat, version-keyed lock (yarn.lock v1 shape).
//!
//! The decoded structure is a mapping from `"name@range"` composite keys to
//! resolution records. Nesting is not encoded at all; the reader re-derives
//! it from each record's declared sub-dependencies, falling back to semver
//! range satisfaction when an exact key is absent. The writer flattens the
//! logical tree back into one record per distinct name+range, which
//! collapses shared occurrences and keeps conflicting versions as separate
//! entries.

use crate::builder::{self, LockSource, Requirement, SourceEntry};
use crate::registry::{MetadataSource, PackageMetadata, RegistryError};
use crate::tree::{DepKind, Locator, LogicalTree, NodeId};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A decoded flat lock: one record per distinct `"name@range"` key.
/// Records shared by several ranges appear once per key; the concrete
/// serializer merges identical records into one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YarnLock {
    pub entries: BTreeMap<String, YarnEntry>,
}

/// One flat resolution record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YarnEntry {
    /// Resolved version, or the locator string for non-registry sources.
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    /// Declared sub-dependencies: name -> range.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
}

/// Split a `"name@range"` composite key. The split is at the last `@` so
/// scoped names (`@scope/pkg@^1.0.0`) keep their scope.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let at = key.rfind('@').filter(|&i| i > 0)?;
    Some((&key[..at], &key[at + 1..]))
}

/// Reader adapter for the flat format.
pub struct YarnSource<'a> {
    lock: &'a YarnLock,
}

impl<'a> YarnSource<'a> {
    #[must_use]
    pub fn new(lock: &'a YarnLock) -> Self {
        Self { lock }
    }

    fn to_source(&self, range: &str, entry: &YarnEntry) -> Option<SourceEntry> {
        // Non-registry edges carry their locator in the key's range part;
        // registry edges resolve to the record's version field.
        let locator =
            Locator::non_registry(range).or_else(|| Locator::classify(&entry.version))?;
        let mut requires: Vec<Requirement> = Vec::new();
        for (name, dep_range) in &entry.dependencies {
            requires.push(Requirement {
                name: name.clone(),
                range: dep_range.clone(),
                kind: DepKind::Production,
            });
        }
        for (name, dep_range) in &entry.optional_dependencies {
            requires.push(Requirement {
                name: name.clone(),
                range: dep_range.clone(),
                kind: DepKind::Optional,
            });
        }
        Some(SourceEntry {
            locator,
            integrity: entry.integrity.clone(),
            resolved: entry.resolved.clone(),
            requires,
        })
    }
}

impl LockSource for YarnSource<'_> {
    // The flat table has no positions; every record is equally visible.
    type Pos = ();

    fn root_position(&self) {}

    fn resolve(&self, name: &str, range: &str, (): &()) -> Option<(SourceEntry, ())> {
        if let Some(entry) = self.lock.entries.get(&format!("{name}@{range}")) {
            return self.to_source(range, entry).map(|s| (s, ()));
        }

        // No exact key: the lock does not state which occurrence this edge
        // resolved to, so fall back to range satisfaction over same-name
        // records and take the highest matching version.
        let req = builder::parse_range(range)?;
        let mut best: Option<(Version, &YarnEntry)> = None;
        for (key, entry) in &self.lock.entries {
            let Some((entry_name, _)) = split_key(key) else {
                continue;
            };
            if entry_name != name {
                continue;
            }
            let Ok(version) = Version::parse(&entry.version) else {
                continue;
            };
            if !req.matches(&version) {
                continue;
            }
            if best.as_ref().map_or(true, |(b, _)| version > *b) {
                best = Some((version, entry));
            }
        }
        let (_, entry) = best?;
        self.to_source(range, entry).map(|s| (s, ()))
    }
}

/// Read a decoded flat lock into a logical tree.
pub fn read(lock: &YarnLock, manifest: &crate::Manifest) -> Result<LogicalTree, crate::BuildError> {
    builder::build(manifest, &YarnSource::new(lock))
}

/// Lower a logical tree into the flat format. Output order is the key
/// order (name, then range), so repeated conversions of an unchanged tree
/// are identical.
///
/// # Errors
///
/// Propagates [`RegistryError`] when a registry package is missing its
/// `resolved` pointer and the gateway cannot supply one.
pub fn write(tree: &LogicalTree, registry: &dyn MetadataSource) -> Result<YarnLock, RegistryError> {
    let mut entries: BTreeMap<String, YarnEntry> = BTreeMap::new();
    let mut fetched: HashMap<NodeId, PackageMetadata> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![tree.root()];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        for (name, edge) in &tree.node(id).dependencies {
            stack.push(edge.node);
            let key = format!("{name}@{}", edge.range);
            if entries.contains_key(&key) {
                continue;
            }
            let node = tree.node(edge.node);

            let mut resolved = node.resolved.clone();
            let mut integrity = node.integrity.clone();
            if resolved.is_none() {
                if let Some(version) = node.locator.version() {
                    let metadata = match fetched.get(&edge.node) {
                        Some(m) => m.clone(),
                        None => {
                            let m = registry.lookup(&node.name, &version.to_string())?;
                            fetched.insert(edge.node, m.clone());
                            m
                        }
                    };
                    resolved = metadata.resolved;
                    if integrity.is_none() {
                        integrity = metadata.integrity;
                    }
                }
            }

            let mut dependencies = BTreeMap::new();
            let mut optional_dependencies = BTreeMap::new();
            for (dep_name, dep_edge) in &node.dependencies {
                if dep_edge.kind == DepKind::Optional {
                    optional_dependencies.insert(dep_name.clone(), dep_edge.range.clone());
                } else {
                    dependencies.insert(dep_name.clone(), dep_edge.range.clone());
                }
            }

            entries.insert(
                key,
                YarnEntry {
                    version: node.version_field(),
                    resolved,
                    integrity,
                    dependencies,
                    optional_dependencies,
                },
            );
        }
    }

    Ok(YarnLock { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticMetadata;
    use crate::Manifest;

    fn lock(entries: Vec<(&str, YarnEntry)>) -> YarnLock {
        YarnLock {
            entries: entries
                .into_iter()
                .map(|(k, e)| (k.to_string(), e))
                .collect(),
        }
    }

    fn entry(version: &str, deps: Vec<(&str, &str)>) -> YarnEntry {
        YarnEntry {
            version: version.to_string(),
            resolved: Some(format!("https://registry.example.com/{version}.tgz")),
            integrity: None,
            dependencies: deps
                .into_iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            optional_dependencies: BTreeMap::new(),
        }
    }

    #[test]
    fn split_key_handles_scopes() {
        assert_eq!(split_key("left-pad@^1.0.0"), Some(("left-pad", "^1.0.0")));
        assert_eq!(
            split_key("@babel/core@^7.0.0"),
            Some(("@babel/core", "^7.0.0"))
        );
        assert_eq!(
            split_key("pkg@github:owner/repo#ref"),
            Some(("pkg", "github:owner/repo#ref"))
        );
        assert_eq!(split_key("@scope/pkg"), None);
        assert_eq!(split_key("no-at-sign"), None);
    }

    #[test]
    fn reads_single_root_dependency() {
        let lock = lock(vec![("left-pad@^1.0.0", entry("1.3.0", vec![]))]);
        let manifest =
            Manifest::parse(r#"{"dependencies": {"left-pad": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let edge = &tree.node(tree.root()).dependencies["left-pad"];
        assert_eq!(edge.kind, DepKind::Production);
        assert_eq!(tree.node(edge.node).version_field(), "1.3.0");
    }

    #[test]
    fn falls_back_to_range_satisfaction() {
        // The requiring record declares "^1.1.0" but the lock only keys the
        // occurrence under "^1.0.0"; the reader must still find 1.3.0.
        let lock = lock(vec![
            ("a@^1.0.0", entry("1.0.0", vec![("left-pad", "^1.1.0")])),
            ("left-pad@^1.0.0", entry("1.3.0", vec![])),
        ]);
        let manifest = Manifest::parse(r#"{"dependencies": {"a": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let a = tree.node(tree.root()).dependencies["a"].node;
        let left_pad = tree.node(a).dependencies["left-pad"].node;
        assert_eq!(tree.node(left_pad).version_field(), "1.3.0");
    }

    #[test]
    fn optional_dependencies_classify_edges() {
        let mut record = entry("1.0.0", vec![]);
        record
            .optional_dependencies
            .insert("fsevents".to_string(), "^2.0.0".to_string());
        let lock = lock(vec![
            ("watcher@^1.0.0", record),
            ("fsevents@^2.0.0", entry("2.3.2", vec![])),
        ]);
        let manifest = Manifest::parse(r#"{"dependencies": {"watcher": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let watcher = tree.node(tree.root()).dependencies["watcher"].node;
        assert_eq!(
            tree.node(watcher).dependencies["fsevents"].kind,
            DepKind::Optional
        );
    }

    #[test]
    fn write_collapses_shared_occurrences_and_keeps_conflicts() {
        // a and b share left-pad@1.3.0 under different ranges; c pins an
        // incompatible 2.0.0. The flat table keeps one record per range.
        let lock = lock(vec![
            ("a@^1.0.0", entry("1.0.0", vec![("left-pad", "^1.0.0")])),
            ("b@^1.0.0", entry("1.0.0", vec![("left-pad", "^1.2.0")])),
            ("c@^1.0.0", entry("1.0.0", vec![("left-pad", "^2.0.0")])),
            ("left-pad@^1.0.0", entry("1.3.0", vec![])),
            ("left-pad@^1.2.0", entry("1.3.0", vec![])),
            ("left-pad@^2.0.0", entry("2.0.0", vec![])),
        ]);
        let manifest = Manifest::parse(
            r#"{"dependencies": {"a": "^1.0.0", "b": "^1.0.0", "c": "^1.0.0"}}"#,
        )
        .unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let out = write(&tree, &StaticMetadata::new()).unwrap();
        assert_eq!(out.entries["left-pad@^1.0.0"].version, "1.3.0");
        assert_eq!(out.entries["left-pad@^1.2.0"].version, "1.3.0");
        assert_eq!(out.entries["left-pad@^2.0.0"].version, "2.0.0");
        assert_eq!(
            out.entries["left-pad@^1.0.0"],
            out.entries["left-pad@^1.2.0"]
        );
    }

    #[test]
    fn write_fetches_missing_resolved() {
        let mut bare = entry("1.3.0", vec![]);
        bare.resolved = None;
        let lock = lock(vec![("left-pad@^1.0.0", bare)]);
        let manifest = Manifest::parse(r#"{"dependencies": {"left-pad": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();

        let err = write(&tree, &StaticMetadata::new()).unwrap_err();
        assert!(err.to_string().starts_with("404 Not Found:"));

        let mut registry = StaticMetadata::new();
        registry.insert(
            "left-pad",
            "1.3.0",
            PackageMetadata {
                resolved: Some("https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz".into()),
                integrity: Some("sha512-mqH5zrpPkWGXUVXPKDUf".into()),
            },
        );
        let out = write(&tree, &registry).unwrap();
        let record = &out.entries["left-pad@^1.0.0"];
        assert!(record.resolved.as_deref().unwrap().contains("left-pad-1.3.0.tgz"));
        assert!(record.integrity.is_some());
    }
}
