//! Format Y: the nested, path-keyed lock (package-lock.json v1 shape).
//!
//! Nesting reflects resolution: an entry's dependencies resolve to the
//! nearest same-name entry at or above its own position, exactly like
//! node_modules lookup. The reader walks outward toward the root and takes
//! the first match; the writer re-derives placement by hoisting names that
//! resolve to a single occurrence and keeping contested names nested under
//! each requiring record, with bundled sub-trees nested under their owner.

use crate::builder::{self, LockSource, Requirement, SourceEntry};
use crate::registry::{MetadataSource, PackageMetadata, RegistryError};
use crate::tree::{DepKind, LogicalTree, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

fn is_false(v: &bool) -> bool {
    !*v
}

fn default_requires_flag() -> bool {
    true
}

/// A decoded nested lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageLock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub lockfile_version: u32,

    #[serde(default = "default_requires_flag")]
    pub requires: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, NpmEntry>,
}

/// One nested resolution record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpmEntry {
    /// Resolved version, or the locator string for non-registry sources.
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub dev: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub bundled: bool,

    /// Declared sub-dependencies: name -> range.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, String>,

    /// Occurrences nested at this position because a shallower placement
    /// would conflict (or because they are bundled here).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, NpmEntry>,
}

impl NpmEntry {
    /// The kind this record declares for the edge pointing at it. Dev
    /// status is not declared below the root (it is inherited from the
    /// manifest's sections), so it is ignored here.
    fn declared_kind(&self) -> DepKind {
        if self.bundled {
            DepKind::Bundled
        } else if self.optional {
            DepKind::Optional
        } else {
            DepKind::Production
        }
    }
}

/// Reader adapter for the nested format. A position is the chain of entry
/// names from the top-level table down to a record.
pub struct NpmSource<'a> {
    lock: &'a PackageLock,
}

impl<'a> NpmSource<'a> {
    #[must_use]
    pub fn new(lock: &'a PackageLock) -> Self {
        Self { lock }
    }

    fn table_at(&self, path: &[String]) -> Option<&BTreeMap<String, NpmEntry>> {
        let mut table = &self.lock.dependencies;
        for name in path {
            table = &table.get(name)?.dependencies;
        }
        Some(table)
    }

    /// The nearest entry for `name` visible from `at`, with its position.
    /// First match walking outward toward the root wins; the format states
    /// the chosen occurrence explicitly, so no range check is needed.
    fn find(&self, name: &str, at: &[String]) -> Option<(&NpmEntry, Vec<String>)> {
        for cut in (0..=at.len()).rev() {
            if let Some(entry) = self.table_at(&at[..cut]).and_then(|t| t.get(name)) {
                let mut pos = at[..cut].to_vec();
                pos.push(name.to_string());
                return Some((entry, pos));
            }
        }
        None
    }
}

impl LockSource for NpmSource<'_> {
    type Pos = Vec<String>;

    fn root_position(&self) -> Vec<String> {
        Vec::new()
    }

    fn resolve(
        &self,
        name: &str,
        range: &str,
        at: &Vec<String>,
    ) -> Option<(SourceEntry, Vec<String>)> {
        let (entry, pos) = self.find(name, at)?;
        let locator = crate::tree::Locator::non_registry(range)
            .or_else(|| crate::tree::Locator::classify(&entry.version))?;

        let mut requires = Vec::new();
        for (dep_name, dep_range) in &entry.requires {
            // Optionality and bundling are declared on the target record
            // in this format, so peek at the occurrence the edge will
            // resolve to.
            let kind = self
                .find(dep_name, &pos)
                .map_or(DepKind::Production, |(dep, _)| dep.declared_kind());
            requires.push(Requirement {
                name: dep_name.clone(),
                range: dep_range.clone(),
                kind,
            });
        }

        Some((
            SourceEntry {
                locator,
                integrity: entry.integrity.clone(),
                resolved: entry.resolved.clone(),
                requires,
            },
            pos,
        ))
    }
}

/// Read a decoded nested lock into a logical tree. Root-level kinds come
/// from the manifest's sections, which remain the single source of truth.
pub fn read(
    lock: &PackageLock,
    manifest: &crate::Manifest,
) -> Result<LogicalTree, crate::BuildError> {
    builder::build(manifest, &NpmSource::new(lock))
}

/// A physical placement of one logical node in the emitted nesting.
#[derive(Debug)]
struct Placed {
    node: NodeId,
    children: BTreeMap<String, Placed>,
}

fn placed_table_at<'t>(
    top: &'t mut BTreeMap<String, Placed>,
    path: &[String],
) -> Option<&'t mut BTreeMap<String, Placed>> {
    let mut table = top;
    for name in path {
        table = &mut table.get_mut(name)?.children;
    }
    Some(table)
}

/// Lower a logical tree into the nested format.
///
/// Placement reproduces resolver hoisting: walking the tree breadth-first,
/// a name that resolves to one occurrence everywhere hoists to the
/// shallowest free position along its requiring record's placement path,
/// and an occurrence already visible on that path is shared instead of
/// duplicated. A contested name (several distinct occurrences in the tree)
/// never hoists above its requiring record, so no occurrence shadows a
/// sibling's. Bundled edges skip the walk entirely and nest under their
/// owner.
///
/// # Errors
///
/// Propagates [`RegistryError`] when a registry package is missing its
/// `resolved` or `integrity` field and the gateway cannot supply it.
pub fn write(
    tree: &LogicalTree,
    manifest: &crate::Manifest,
    registry: &dyn MetadataSource,
) -> Result<PackageLock, RegistryError> {
    let kinds = tree.classify();
    let contested = contested_names(tree);

    let mut top: BTreeMap<String, Placed> = BTreeMap::new();
    let mut queue: VecDeque<(NodeId, Vec<String>)> = VecDeque::from([(tree.root(), Vec::new())]);
    while let Some((id, path)) = queue.pop_front() {
        for (name, edge) in &tree.node(id).dependencies {
            if kinds[edge.node.0] == DepKind::Bundled && !path.is_empty() {
                // Bundled sub-trees are a nested literal block under their
                // owner, never hoisted.
                let Some(table) = placed_table_at(&mut top, &path) else {
                    continue;
                };
                if !table.contains_key(name) {
                    table.insert(
                        name.clone(),
                        Placed {
                            node: edge.node,
                            children: BTreeMap::new(),
                        },
                    );
                    queue.push_back((edge.node, chain(&path, name)));
                }
                continue;
            }

            for depth in 0..=path.len() {
                let Some(table) = placed_table_at(&mut top, &path[..depth]) else {
                    continue;
                };
                match table.get(name) {
                    Some(placed) if placed.node == edge.node => break,
                    // A different occurrence of the same name holds this
                    // level; try one level deeper.
                    Some(_) => {}
                    // Contested names only place at their requiring
                    // record's own level.
                    None if depth < path.len() && contested.contains(name) => {}
                    None => {
                        table.insert(
                            name.clone(),
                            Placed {
                                node: edge.node,
                                children: BTreeMap::new(),
                            },
                        );
                        queue.push_back((edge.node, chain(&path[..depth], name)));
                        break;
                    }
                }
            }
        }
    }

    let mut fetched: HashMap<NodeId, PackageMetadata> = HashMap::new();
    let dependencies = emit(&top, tree, &kinds, registry, &mut fetched)?;

    Ok(PackageLock {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        lockfile_version: 1,
        requires: true,
        dependencies,
    })
}

fn chain(path: &[String], name: &str) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(name.to_string());
    next
}

/// Names whose edges resolve to more than one distinct occurrence anywhere
/// in the tree. Hoisting one of them would shadow the others at every
/// deeper position, so these stay nested.
fn contested_names(tree: &LogicalTree) -> HashSet<String> {
    let mut first: HashMap<&str, NodeId> = HashMap::new();
    let mut contested = HashSet::new();
    for i in 0..tree.len() {
        for (name, edge) in &tree.node(NodeId(i)).dependencies {
            match first.get(name.as_str()) {
                None => {
                    first.insert(name, edge.node);
                }
                Some(&seen) if seen == edge.node => {}
                Some(_) => {
                    contested.insert(name.clone());
                }
            }
        }
    }
    contested
}

fn emit(
    placed: &BTreeMap<String, Placed>,
    tree: &LogicalTree,
    kinds: &[DepKind],
    registry: &dyn MetadataSource,
    fetched: &mut HashMap<NodeId, PackageMetadata>,
) -> Result<BTreeMap<String, NpmEntry>, RegistryError> {
    let mut out = BTreeMap::new();
    for (name, slot) in placed {
        let node = tree.node(slot.node);
        let kind = kinds[slot.node.0];

        let mut resolved = node.resolved.clone();
        let mut integrity = node.integrity.clone();
        if kind != DepKind::Bundled && (resolved.is_none() || integrity.is_none()) {
            if let Some(version) = node.locator.version() {
                let metadata = match fetched.get(&slot.node) {
                    Some(m) => m.clone(),
                    None => {
                        let m = registry.lookup(&node.name, &version.to_string())?;
                        fetched.insert(slot.node, m.clone());
                        m
                    }
                };
                if resolved.is_none() {
                    resolved = metadata.resolved;
                }
                if integrity.is_none() {
                    integrity = metadata.integrity;
                }
            }
        }

        let requires = node
            .dependencies
            .iter()
            .map(|(dep_name, dep_edge)| (dep_name.clone(), dep_edge.range.clone()))
            .collect();

        out.insert(
            name.clone(),
            NpmEntry {
                version: node.version_field(),
                resolved,
                integrity,
                dev: kind == DepKind::Development,
                optional: kind == DepKind::Optional,
                bundled: kind == DepKind::Bundled,
                requires,
                dependencies: emit(&slot.children, tree, kinds, registry, fetched)?,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticMetadata;
    use crate::Manifest;

    fn entry(version: &str, requires: Vec<(&str, &str)>) -> NpmEntry {
        NpmEntry {
            version: version.to_string(),
            resolved: Some(format!("https://registry.example.com/{version}.tgz")),
            integrity: Some(format!("sha512-{version}")),
            requires: requires
                .into_iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            ..NpmEntry::default()
        }
    }

    fn lock(dependencies: Vec<(&str, NpmEntry)>) -> PackageLock {
        PackageLock {
            name: Some("app".to_string()),
            version: Some("1.0.0".to_string()),
            lockfile_version: 1,
            requires: true,
            dependencies: dependencies
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        }
    }

    #[test]
    fn reads_nested_conflicting_versions() {
        // b requires left-pad@^2 which is nested under b; the root holds
        // left-pad@1.3.0.
        let mut b = entry("1.0.0", vec![("left-pad", "^2.0.0")]);
        b.dependencies
            .insert("left-pad".to_string(), entry("2.0.0", vec![]));
        let lock = lock(vec![
            ("left-pad", entry("1.3.0", vec![])),
            ("b", b),
        ]);
        let manifest = Manifest::parse(
            r#"{"dependencies": {"left-pad": "^1.0.0", "b": "^1.0.0"}}"#,
        )
        .unwrap();
        let tree = read(&lock, &manifest).unwrap();

        let root_left_pad = tree.node(tree.root()).dependencies["left-pad"].node;
        let b_id = tree.node(tree.root()).dependencies["b"].node;
        let nested_left_pad = tree.node(b_id).dependencies["left-pad"].node;
        assert_eq!(tree.node(root_left_pad).version_field(), "1.3.0");
        assert_eq!(tree.node(nested_left_pad).version_field(), "2.0.0");
        assert_ne!(root_left_pad, nested_left_pad);
    }

    #[test]
    fn reads_hoisted_shared_occurrence() {
        let lock = lock(vec![
            ("a", entry("1.0.0", vec![("left-pad", "^1.0.0")])),
            ("left-pad", entry("1.3.0", vec![])),
        ]);
        let manifest = Manifest::parse(
            r#"{"dependencies": {"a": "^1.0.0", "left-pad": "^1.0.0"}}"#,
        )
        .unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let a = tree.node(tree.root()).dependencies["a"].node;
        assert_eq!(
            tree.node(a).dependencies["left-pad"].node,
            tree.node(tree.root()).dependencies["left-pad"].node
        );
    }

    #[test]
    fn optional_flag_classifies_the_edge() {
        let mut fsevents = entry("2.3.2", vec![]);
        fsevents.optional = true;
        let lock = lock(vec![
            ("watcher", entry("1.0.0", vec![("fsevents", "^2.0.0")])),
            ("fsevents", fsevents),
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
    fn write_hoists_shared_version_to_root() {
        let lock = lock(vec![
            ("a", entry("1.0.0", vec![("left-pad", "^1.0.0")])),
            ("b", entry("1.0.0", vec![("left-pad", "^1.0.0")])),
            ("left-pad", entry("1.3.0", vec![])),
        ]);
        let manifest =
            Manifest::parse(r#"{"dependencies": {"a": "^1.0.0", "b": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let out = write(&tree, &manifest, &StaticMetadata::new()).unwrap();

        // One shared entry at the root; nothing nested.
        assert_eq!(out.dependencies["left-pad"].version, "1.3.0");
        assert!(out.dependencies["a"].dependencies.is_empty());
        assert!(out.dependencies["b"].dependencies.is_empty());
    }

    #[test]
    fn write_keeps_conflicting_versions_nested() {
        let mut a = entry("1.0.0", vec![("left-pad", "^1.0.0")]);
        a.dependencies
            .insert("left-pad".to_string(), entry("1.3.0", vec![]));
        let mut b = entry("1.0.0", vec![("left-pad", "^2.0.0")]);
        b.dependencies
            .insert("left-pad".to_string(), entry("2.0.0", vec![]));
        let lock = lock(vec![("a", a), ("b", b)]);
        let manifest =
            Manifest::parse(r#"{"dependencies": {"a": "^1.0.0", "b": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let out = write(&tree, &manifest, &StaticMetadata::new()).unwrap();

        // Two occurrences compete for one name: neither may claim the
        // root, and each stays under its requiring record.
        assert!(!out.dependencies.contains_key("left-pad"));
        assert_eq!(
            out.dependencies["a"].dependencies["left-pad"].version,
            "1.3.0"
        );
        assert_eq!(
            out.dependencies["b"].dependencies["left-pad"].version,
            "2.0.0"
        );
    }

    #[test]
    fn write_marks_dev_and_optional_flags() {
        let lock = lock(vec![
            ("tape", entry("4.9.0", vec![])),
            ("fsevents", entry("2.3.2", vec![])),
            ("left-pad", entry("1.3.0", vec![])),
        ]);
        let manifest = Manifest::parse(
            r#"{
                "dependencies": {"left-pad": "^1.0.0"},
                "devDependencies": {"tape": "^4.0.0"},
                "optionalDependencies": {"fsevents": "^2.0.0"}
            }"#,
        )
        .unwrap();
        let tree = read(&lock, &manifest).unwrap();
        let out = write(&tree, &manifest, &StaticMetadata::new()).unwrap();
        assert!(out.dependencies["tape"].dev);
        assert!(out.dependencies["fsevents"].optional);
        let left_pad = &out.dependencies["left-pad"];
        assert!(!left_pad.dev && !left_pad.optional);
    }

    #[test]
    fn write_fills_missing_integrity_from_registry() {
        let mut bare = entry("1.3.0", vec![]);
        bare.integrity = None;
        bare.resolved = None;
        let lock = lock(vec![("left-pad", bare)]);
        let manifest = Manifest::parse(r#"{"dependencies": {"left-pad": "^1.0.0"}}"#).unwrap();
        let tree = read(&lock, &manifest).unwrap();

        let err = write(&tree, &manifest, &StaticMetadata::new()).unwrap_err();
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
        let out = write(&tree, &manifest, &registry).unwrap();
        assert!(out.dependencies["left-pad"].integrity.is_some());
        assert!(out.dependencies["left-pad"].resolved.is_some());
    }

    #[test]
    fn serialization_skips_empty_fields() {
        let out = lock(vec![("left-pad", {
            let mut e = entry("1.3.0", vec![]);
            e.integrity = None;
            e
        })]);
        let json = serde_json::to_string_pretty(&out).unwrap();
        assert!(json.contains("\"lockfileVersion\": 1"));
        assert!(!json.contains("integrity"));
        assert!(!json.contains("\"dev\""));
        assert!(!json.contains("\"requires\": {}"));
    }
}
