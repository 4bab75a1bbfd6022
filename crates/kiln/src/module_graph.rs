//! Module dependency graph
//!
//! Nodes are modules, edges point from an importer to what it imports (and
//! from a submodule to its parent package). Adding a module or an edge twice
//! is a no-op, so re-discovering a module never duplicates anything.
//!
//! An edge cut by an exclusion rule stays in the graph as [`Edge::Severed`];
//! retention only follows [`Edge::Import`] edges.

use log::debug;
use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::{Bfs, EdgeFiltered, EdgeRef},
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::{ModuleRef, ModuleSet};

/// Unique identifier for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value of the ModuleId
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

/// How an importer reaches what it imports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Import,
    /// Cut by an exclusion rule
    Severed,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Module records, indexed by `ModuleId`
    modules: Vec<ModuleRef>,
    module_names: FxHashMap<String, ModuleId>,
    graph: DiGraph<ModuleId, Edge>,
    node_indices: FxHashMap<ModuleId, NodeIndex>,
    roots: FxHashSet<ModuleId>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, or merge the discovery reason into an existing one
    ///
    /// Returns the id and whether the module was newly added.
    pub fn add_module(&mut self, module: ModuleRef) -> (ModuleId, bool) {
        if let Some(&existing) = self.module_names.get(&module.name) {
            let record = &mut self.modules[existing.as_u32() as usize];
            for reason in module.discovered_via {
                record.merge_reason(reason);
            }
            return (existing, false);
        }

        let id = ModuleId::new(
            u32::try_from(self.modules.len()).unwrap_or(u32::MAX),
        );
        debug!("Registered module '{}' ({})", module.name, module.origin);
        self.module_names.insert(module.name.clone(), id);
        self.modules.push(module);
        let node = self.graph.add_node(id);
        self.node_indices.insert(id, node);
        (id, true)
    }

    /// Record that `from` imports `to`
    ///
    /// A live import replaces a severed edge between the same pair, never
    /// the other way round.
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId, edge: Edge) {
        let (Some(&from_idx), Some(&to_idx)) =
            (self.node_indices.get(&from), self.node_indices.get(&to))
        else {
            return;
        };
        if from_idx == to_idx {
            return;
        }
        match self.graph.find_edge(from_idx, to_idx) {
            Some(existing) => {
                if edge == Edge::Import {
                    self.graph[existing] = Edge::Import;
                }
            }
            None => {
                self.graph.add_edge(from_idx, to_idx, edge);
            }
        }
    }

    pub fn add_root(&mut self, id: ModuleId) {
        self.roots.insert(id);
    }

    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.module_names.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> &ModuleRef {
        &self.modules[id.as_u32() as usize]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut ModuleRef {
        &mut self.modules[id.as_u32() as usize]
    }

    /// Number of modules discovered, retained or not
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Names of the modules `id` imports over live edges
    pub fn dependencies(&self, id: ModuleId) -> Vec<&str> {
        let Some(&node) = self.node_indices.get(&id) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .filter(|edge| *edge.weight() == Edge::Import)
            .map(|edge| self.module(self.graph[edge.target()]).name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Modules reachable from a root over live edges
    pub fn retained(&self) -> FxHashSet<ModuleId> {
        let filtered = EdgeFiltered::from_fn(&self.graph, |edge| *edge.weight() == Edge::Import);

        let mut retained = FxHashSet::default();
        let mut roots: Vec<_> = self.roots.iter().copied().collect();
        roots.sort_unstable();
        for root in roots {
            let Some(&start) = self.node_indices.get(&root) else {
                continue;
            };
            let mut bfs = Bfs::new(&filtered, start);
            while let Some(node) = bfs.next(&filtered) {
                retained.insert(self.graph[node]);
            }
        }
        retained
    }

    /// Snapshot of the retained modules
    pub fn to_module_set(&self, entry: &str) -> ModuleSet {
        let retained = self.retained();
        ModuleSet::new(
            entry.to_owned(),
            self.modules
                .iter()
                .enumerate()
                .filter(|(index, _)| {
                    u32::try_from(*index).is_ok_and(|i| retained.contains(&ModuleId::new(i)))
                })
                .map(|(_, module)| module.clone()),
        )
    }
}
