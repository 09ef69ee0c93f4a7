//! The logical dependency tree: the canonical, format-agnostic model both
//! lock formats are lowered to and raised from.
//!
//! Nodes live in an arena indexed by a stable identity key
//! (`name@locator`), with edges stored as arena indices. Two positions that
//! resolve to the same name and locator share one node, which makes the
//! revisit short-circuit during construction a plain map lookup and keeps
//! hoisted/deduplicated packages shared by reference.

use semver::Version;
use std::collections::{HashMap, VecDeque};

/// The kind of a dependency edge.
///
/// Kind is a property of the edge (the dependency reference), not of the
/// package version itself: one physical package may be required as a
/// production dependency in one position and a development dependency in
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    /// Regular runtime dependency.
    Production,
    /// Dependency that may fail to install without failing the build.
    Optional,
    /// Development-only dependency.
    Development,
    /// Dependency shipped inside its owner's tarball.
    Bundled,
}

impl DepKind {
    /// Total-order precedence: lower wins when a name is declared under
    /// more than one manifest section (production > optional > development).
    pub fn precedence(self) -> u8 {
        match self {
            Self::Production => 0,
            Self::Optional => 1,
            Self::Development => 2,
            Self::Bundled => 3,
        }
    }

    fn from_precedence(p: u8) -> Self {
        match p {
            0 => Self::Production,
            1 => Self::Optional,
            2 => Self::Development,
            _ => Self::Bundled,
        }
    }

    /// The stronger of two kinds under the precedence rule.
    pub fn strongest(self, other: Self) -> Self {
        Self::from_precedence(self.precedence().min(other.precedence()))
    }
}

impl std::fmt::Display for DepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Optional => write!(f, "optional"),
            Self::Development => write!(f, "development"),
            Self::Bundled => write!(f, "bundled"),
        }
    }
}

/// What a package occurrence resolved to: a registry version or one of the
/// non-registry sources. Locator strings are carried verbatim; writers
/// translate only the field shape, never the locator itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// A plain registry version.
    Version(Version),
    /// A GitHub reference (`github:owner/repo#ref`).
    GitHub(String),
    /// A git URL (`git://...`, `git+https://...`).
    Git(String),
    /// A local file path (`file:relative/path`).
    File(String),
    /// An arbitrary tarball URL.
    Url(String),
}

impl Locator {
    /// Classify a string appearing where a declared range is expected.
    /// Returns `None` for ordinary semver ranges.
    pub fn non_registry(source: &str) -> Option<Self> {
        if source.starts_with("github:") {
            Some(Self::GitHub(source.to_string()))
        } else if source.starts_with("git:") || source.starts_with("git+") {
            Some(Self::Git(source.to_string()))
        } else if source.starts_with("file:") {
            Some(Self::File(source.to_string()))
        } else if source.contains("://") {
            Some(Self::Url(source.to_string()))
        } else {
            None
        }
    }

    /// Classify a resolved version field, which is either a non-registry
    /// locator string or a plain version.
    pub fn classify(source: &str) -> Option<Self> {
        Self::non_registry(source)
            .or_else(|| Version::parse(source).ok().map(Self::Version))
    }

    /// True for plain registry versions.
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Version(_))
    }

    /// The registry version, if this is one.
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version(v) => write!(f, "{v}"),
            Self::GitHub(s) | Self::Git(s) | Self::File(s) | Self::Url(s) => {
                write!(f, "{s}")
            }
        }
    }
}

/// Index of a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position in the arena; indexes the vector [`LogicalTree::classify`]
    /// returns.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A dependency edge: the declared range, the node it resolved to at this
/// position, and the kind the requiring record declares for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The range (or locator string) as declared by the requiring record.
    pub range: String,
    /// The resolved occurrence.
    pub node: NodeId,
    /// Declared kind of this edge. Effective classification of a node,
    /// with inherited dev/optional status folded in, comes from
    /// [`LogicalTree::classify`].
    pub kind: DepKind,
}

/// One resolved occurrence of a package in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalNode {
    /// Scoped or unscoped package name.
    pub name: String,
    /// What this occurrence resolved to.
    pub locator: Locator,
    /// Opaque content pointer, carried through unchanged when present.
    pub integrity: Option<String>,
    /// Opaque source pointer, carried through unchanged when present.
    pub resolved: Option<String>,
    /// Immediate dependencies, keyed by name (unique within one node).
    pub dependencies: std::collections::BTreeMap<String, Edge>,
    /// True only for the synthetic top-level node.
    pub is_root: bool,
}

impl LogicalNode {
    /// The value emitted into a version field: the version for registry
    /// packages, the locator string verbatim otherwise.
    pub fn version_field(&self) -> String {
        self.locator.to_string()
    }
}

/// The canonical dependency graph, rooted at the project's own manifest.
#[derive(Debug, Clone)]
pub struct LogicalTree {
    nodes: Vec<LogicalNode>,
    index: HashMap<String, NodeId>,
    root: NodeId,
}

fn identity_key(name: &str, locator: &Locator) -> String {
    format!("{name}@{locator}")
}

impl LogicalTree {
    pub(crate) fn new(root_name: &str, root_locator: Locator) -> Self {
        let root = LogicalNode {
            name: root_name.to_string(),
            locator: root_locator,
            integrity: None,
            resolved: None,
            dependencies: std::collections::BTreeMap::new(),
            is_root: true,
        };
        Self {
            nodes: vec![root],
            index: HashMap::new(),
            root: NodeId(0),
        }
    }

    /// The synthetic root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &LogicalNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut LogicalNode {
        &mut self.nodes[id.0]
    }

    /// Look up an existing occurrence by identity key. This is the
    /// revisit short-circuit: a position that resolves to an already-seen
    /// name+locator reuses the node instead of re-descending.
    pub(crate) fn lookup(&self, name: &str, locator: &Locator) -> Option<NodeId> {
        self.index.get(&identity_key(name, locator)).copied()
    }

    pub(crate) fn intern(
        &mut self,
        name: String,
        locator: Locator,
        integrity: Option<String>,
        resolved: Option<String>,
    ) -> NodeId {
        let key = identity_key(&name, &locator);
        let id = NodeId(self.nodes.len());
        self.nodes.push(LogicalNode {
            name,
            locator,
            integrity,
            resolved,
            dependencies: std::collections::BTreeMap::new(),
            is_root: false,
        });
        self.index.insert(key, id);
        id
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Effective classification of every node: the strongest kind over all
    /// paths from the root, where a path's kind is the weakest kind along
    /// its edges. A package only reachable through development edges is
    /// development; one bundled edge away from a production path keeps it
    /// production. This reproduces the nested format's dev/optional/bundled
    /// flags without ad-hoc boolean merging.
    pub fn classify(&self) -> Vec<DepKind> {
        let mut eff = vec![u8::MAX; self.nodes.len()];
        eff[self.root.0] = DepKind::Production.precedence();
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            let along = eff[id.0];
            for edge in self.nodes[id.0].dependencies.values() {
                let cand = along.max(edge.kind.precedence());
                if cand < eff[edge.node.0] {
                    eff[edge.node.0] = cand;
                    queue.push_back(edge.node);
                }
            }
        }
        eff.into_iter()
            .map(|p| DepKind::from_precedence(p.min(3)))
            .collect()
    }
}
