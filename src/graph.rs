//! Discovers the transitive dependency graph rooted at a future and checks
//! it for structural problems (cycles) before the scheduler runs it.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;
use tracing::{debug, trace};

use crate::future::{FutureNode, NodeKey};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle detected: {path}")]
    Cycle { path: String },

    #[error("value for `{node}` was never resolved")]
    Unresolved { node: String },

    #[error("resolved value for `{node}` was not of the expected type")]
    TypeMismatch { node: String },

    #[error("index {index} out of range for `{node}` (length {len})")]
    IndexOutOfRange {
        node: String,
        index: usize,
        len: usize,
    },

    #[error("key {key:?} not found in `{node}`")]
    KeyNotFound { node: String, key: String },
}

/// A built dependency graph: a `petgraph` DAG of [`FutureNode`]s plus the
/// `NodeKey -> NodeIndex` lookup used while traversing it.
pub struct BuiltGraph {
    pub(crate) graph: Graph<Arc<dyn FutureNode>, ()>,
    pub(crate) index_of: HashMap<NodeKey, NodeIndex>,
    pub(crate) root: NodeIndex,
}

impl BuiltGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn root(&self) -> &Arc<dyn FutureNode> {
        &self.graph[self.root]
    }

    pub(crate) fn node(&self, idx: NodeIndex) -> &Arc<dyn FutureNode> {
        &self.graph[idx]
    }

    pub(crate) fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    pub(crate) fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    pub(crate) fn indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }
}

/// Walks a root future's `upstreams()` links breadth-first, deduplicating
/// vertices by [`NodeKey`] (so two separately constructed `Task`s with
/// equal argument records collapse into one vertex, sharing one cache
/// entry and one scheduler slot), and builds a `petgraph` DAG from the
/// result. Mirrors the `task_graph`/`task_lookup` pair on the teacher's
/// package-graph builder, generalized from package names to `NodeKey`.
pub struct GraphBuilder;

impl GraphBuilder {
    #[tracing::instrument(skip(root))]
    pub fn build(root: Arc<dyn FutureNode>) -> Result<BuiltGraph, GraphError> {
        let mut graph: Graph<Arc<dyn FutureNode>, ()> = Graph::new();
        let mut index_of: HashMap<NodeKey, NodeIndex> = HashMap::new();

        let root_idx = Self::intern(&mut graph, &mut index_of, root.clone());

        let mut frontier = vec![(root.clone(), root_idx)];
        while let Some((node, idx)) = frontier.pop() {
            for upstream in node.upstreams() {
                let key = upstream.node_key();
                let already_present = index_of.contains_key(&key);
                let upstream_idx = Self::intern(&mut graph, &mut index_of, upstream.clone());
                graph.update_edge(idx, upstream_idx, ());
                if !already_present {
                    trace!(node = %upstream.describe(), "discovered vertex");
                    frontier.push((upstream, upstream_idx));
                }
            }
        }

        debug!(vertices = graph.node_count(), "graph discovery complete");

        if petgraph::algo::is_cyclic_directed(&graph) {
            let path = Self::describe_a_cycle(&graph);
            return Err(GraphError::Cycle { path });
        }

        Ok(BuiltGraph {
            graph,
            index_of,
            root: root_idx,
        })
    }

    fn intern(
        graph: &mut Graph<Arc<dyn FutureNode>, ()>,
        index_of: &mut HashMap<NodeKey, NodeIndex>,
        node: Arc<dyn FutureNode>,
    ) -> NodeIndex {
        let key = node.node_key();
        if let Some(&idx) = index_of.get(&key) {
            return idx;
        }
        let idx = graph.add_node(node);
        index_of.insert(key, idx);
        idx
    }

    /// Extracts one offending cycle's vertex descriptions for the error
    /// message, via a color-marking DFS (white/gray/black).
    fn describe_a_cycle(graph: &Graph<Arc<dyn FutureNode>, ()>) -> String {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; graph.node_count()];
        let mut stack_path: Vec<NodeIndex> = Vec::new();

        fn visit(
            graph: &Graph<Arc<dyn FutureNode>, ()>,
            node: NodeIndex,
            color: &mut Vec<Color>,
            path: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            color[node.index()] = Color::Gray;
            path.push(node);
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                match color[next.index()] {
                    Color::White => {
                        if let Some(cycle) = visit(graph, next, color, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Gray => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
            path.pop();
            color[node.index()] = Color::Black;
            None
        }

        for start in graph.node_indices() {
            if color[start.index()] == Color::White {
                if let Some(cycle) = visit(graph, start, &mut color, &mut stack_path) {
                    return cycle
                        .iter()
                        .map(|idx| graph[*idx].describe())
                        .collect::<Vec<_>>()
                        .join(" -> ");
                }
            }
        }
        "<unknown cycle>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{Future, FutureList};
    use std::sync::Arc as StdArc;

    #[test]
    #[cfg(feature = "json-codec")]
    fn shares_a_vertex_for_equal_task_ids() {
        use crate::future::{Task, TaskContext, TaskNode};
        use crate::identity::{ArgRecord, CanonValue};
        use async_trait::async_trait;

        struct Leaf(i64);

        #[async_trait]
        impl Task for Leaf {
            type Output = i64;
            type Codec = crate::codec::JsonCodec;

            fn task_name(&self) -> &'static str {
                "Leaf"
            }
            fn args(&self) -> ArgRecord {
                ArgRecord::new().field("n", CanonValue::Int(self.0)).unwrap()
            }
            async fn run(&self, _ctx: TaskContext<'_>) -> Result<i64, crate::error::GantryError> {
                Ok(self.0)
            }
        }

        let a = StdArc::new(TaskNode::new(StdArc::new(Leaf(1))));
        let b = StdArc::new(TaskNode::new(StdArc::new(Leaf(1))));
        let list = FutureList::new(vec![
            Future::<i64>::from_node(a),
            Future::<i64>::from_node(b),
        ]);
        let built = GraphBuilder::build(list).unwrap();
        // root + one shared Leaf vertex
        assert_eq!(built.node_count(), 2);
    }

    #[test]
    fn detects_a_cycle() {
        // Cycles can't arise from the public Task/Const/FutureList API (no
        // node can reference a not-yet-constructed one), so this test
        // builds a cyclic graph directly against the petgraph layer to
        // exercise the detection path in isolation.
        struct Stub(&'static str, std::sync::Mutex<Vec<StdArc<dyn FutureNode>>>);

        impl FutureNode for Stub {
            fn node_key(&self) -> crate::future::NodeKey {
                crate::future::NodeKey::Ephemeral(self as *const Self as usize)
            }
            fn upstreams(&self) -> Vec<StdArc<dyn FutureNode>> {
                self.1.lock().unwrap().clone()
            }
            fn identity_fragment(&self) -> CanonValue {
                CanonValue::Str(self.0.to_string())
            }
            fn resolve(&self, _v: &dyn crate::future::ValueLookup) -> Result<crate::future::AnyValue, crate::error::GantryError> {
                unreachable!()
            }
            fn describe(&self) -> String {
                self.0.to_string()
            }
        }
        use crate::identity::CanonValue;

        let a = StdArc::new(Stub("a", std::sync::Mutex::new(Vec::new())));
        let b = StdArc::new(Stub("b", std::sync::Mutex::new(vec![a.clone() as StdArc<dyn FutureNode>])));
        a.1.lock().unwrap().push(b.clone() as StdArc<dyn FutureNode>);

        let err = GraphBuilder::build(a).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }
}
