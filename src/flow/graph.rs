use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::core::errors::{FlowError, Result};
use crate::core::types::InvocationId;

#[derive(Debug)]
pub(crate) struct GraphNode {
    task: String,
    bound: bool,
    /// Every invocation this one transitively depends on
    ancestors: HashSet<InvocationId>,
}

/// Dependency graph of one run.
///
/// Nodes are never removed, so an invocation id doubles as its node index.
/// Edges point from producer to consumer. Ancestor sets are maintained
/// incrementally, which keeps the cycle check for a new binding at
/// O(number of parents).
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
}

fn index(id: InvocationId) -> NodeIndex {
    NodeIndex::new(id.as_u64() as usize)
}

fn id_of(index: NodeIndex) -> InvocationId {
    InvocationId(index.index() as u64)
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an invocation with no inputs bound yet
    pub fn add_node(&mut self, task: &str) -> InvocationId {
        id_of(self.graph.add_node(GraphNode {
            task: task.to_string(),
            bound: false,
            ancestors: HashSet::new(),
        }))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn task(&self, id: InvocationId) -> &str {
        &self.graph[index(id)].task
    }

    pub fn is_bound(&self, id: InvocationId) -> bool {
        self.graph[index(id)].bound
    }

    /// Direct upstream invocations, by id
    pub fn parents(&self, id: InvocationId) -> Vec<InvocationId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct downstream invocations, by id
    pub fn children(&self, id: InvocationId) -> Vec<InvocationId> {
        self.neighbors(id, Direction::Outgoing)
    }

    pub fn is_leaf(&self, id: InvocationId) -> bool {
        self.graph
            .neighbors_directed(index(id), Direction::Outgoing)
            .next()
            .is_none()
    }

    pub fn depends_on(&self, id: InvocationId, upstream: InvocationId) -> bool {
        self.graph[index(id)].ancestors.contains(&upstream)
    }

    fn neighbors(&self, id: InvocationId, direction: Direction) -> Vec<InvocationId> {
        let mut ids: Vec<InvocationId> = self
            .graph
            .neighbors_directed(index(id), direction)
            .map(id_of)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether consuming `parents` from `id` would close a cycle
    pub fn would_cycle(&self, id: InvocationId, parents: &[InvocationId]) -> bool {
        parents
            .iter()
            .any(|parent| *parent == id || self.depends_on(*parent, id))
    }

    /// Record that `id` consumes the outputs of `parents`.
    ///
    /// Fails with `CycleDetected` and leaves the graph untouched if any
    /// parent already (transitively) depends on `id`.
    pub fn bind(&mut self, id: InvocationId, parents: &[InvocationId]) -> Result<()> {
        if self.is_bound(id) {
            return Err(FlowError::AlreadyBound { invocation: id });
        }
        if self.would_cycle(id, parents) {
            return Err(FlowError::CycleDetected {
                task: self.task(id).to_string(),
                invocation: id,
            });
        }

        let mut inherited: HashSet<InvocationId> = HashSet::new();
        let mut seen = HashSet::new();
        for parent in parents {
            if !seen.insert(*parent) {
                continue;
            }
            inherited.insert(*parent);
            inherited.extend(self.graph[index(*parent)].ancestors.iter().copied());
            self.graph.add_edge(index(*parent), index(id), ());
        }
        self.graph[index(id)].bound = true;

        // Invocations already consuming `id` inherit its new ancestry too.
        let mut queue = VecDeque::from([id]);
        let mut visited = HashSet::from([id]);
        while let Some(current) = queue.pop_front() {
            self.graph[index(current)]
                .ancestors
                .extend(inherited.iter().copied());
            for child in self.children(current) {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        Ok(())
    }

    /// Topological order; ties are broken by submission order
    pub fn execution_order(&self) -> Vec<InvocationId> {
        let mut in_degree: Vec<usize> = (0..self.len())
            .map(|i| self.parents(InvocationId(i as u64)).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<InvocationId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(InvocationId(i as u64)))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for child in self.children(id) {
                let degree = &mut in_degree[child.as_u64() as usize];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(child));
                }
            }
        }
        order
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Graphviz rendering. `style` maps an invocation to its fill color.
    pub fn to_dot<F>(&self, name: &str, style: F) -> String
    where
        F: Fn(InvocationId) -> &'static str,
    {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", name.replace('"', "'"));
        dot.push_str("  graph [rankdir=LR];\n");
        dot.push_str("  node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\"];\n");
        for node in self.graph.node_indices() {
            let id = id_of(node);
            let _ = writeln!(
                dot,
                "  n{} [label=\"{} {}\", fillcolor=\"{}\"];",
                id.as_u64(),
                self.graph[node].task.replace('"', "'"),
                id,
                style(id)
            );
        }
        for edge in self.graph.raw_edges() {
            let _ = writeln!(
                dot,
                "  n{} -> n{};",
                edge.source().index(),
                edge.target().index()
            );
        }
        dot.push_str("}\n");
        dot
    }
}
