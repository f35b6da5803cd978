//! The `Future[T]` composition model: tasks and the combinators used to
//! build a dependency graph out of them (`Const`, `FutureList`,
//! `FutureDict`, indexed/keyed projections).
//!
//! Every node in the graph implements [`FutureNode`], a type-erased,
//! object-safe interface the graph builder and scheduler operate on
//! uniformly. Callers hold a typed [`Future`] handle over a node and
//! recover a concrete value via [`Future::get`].

mod const_value;
mod dict;
mod list;
mod mapped;
mod task;

pub use const_value::Const;
pub use dict::FutureDict;
pub use list::FutureList;
pub use mapped::{IndexedFuture, KeyedFuture};
pub use task::{Task, TaskContext, TaskNode, TaskOrigin, TaskVertex};

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::GantryError;
use crate::identity::CanonValue;

/// A resolved value, erased to support heterogeneous graph traversal. The
/// concrete type is recovered by the [`Future<T>`] handle the caller holds.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Identifies a vertex in the dependency graph.
///
/// `Task` vertices are identified by their content-addressed `task_id` so
/// two separately constructed instances with an equal argument record share
/// one graph vertex (and one cache entry). Combinator vertices (`Const`,
/// `FutureList`, `FutureDict`, projections) have no content address of
/// their own and are deduplicated by object identity instead, matching the
/// "deduplicated by object identity" rule for non-task DAG vertices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Task {
        task_name: &'static str,
        task_id: String,
    },
    Ephemeral(usize),
}

impl NodeKey {
    /// An object-identity key derived from an `Arc`'s address. Valid only
    /// for as long as the `Arc` (or a clone of it) is alive, which holds
    /// for the lifetime of a single graph.
    pub fn ephemeral_of<T: ?Sized>(arc: &Arc<T>) -> NodeKey {
        NodeKey::Ephemeral(Arc::as_ptr(arc) as *const () as usize)
    }
}

/// Map of fully resolved values, populated by the scheduler as it finishes
/// dispatching tasks and folding combinators, keyed by [`NodeKey`].
pub type ResolvedValues = HashMap<NodeKey, AnyValue>;

/// Read-only access to a set of resolved values. Implemented for the plain
/// [`ResolvedValues`] map (used in tests and by callers inspecting a
/// finished run) and for the scheduler's concurrently-written map, so
/// [`FutureNode::resolve`] doesn't need to care which one it's reading from
/// mid-run.
pub trait ValueLookup {
    fn lookup(&self, key: &NodeKey) -> Option<AnyValue>;
}

impl ValueLookup for ResolvedValues {
    fn lookup(&self, key: &NodeKey) -> Option<AnyValue> {
        self.get(key).cloned()
    }
}

impl ValueLookup for dashmap::DashMap<NodeKey, AnyValue> {
    fn lookup(&self, key: &NodeKey) -> Option<AnyValue> {
        self.get(key).map(|entry| entry.value().clone())
    }
}

/// A vertex in the dependency graph.
///
/// Implementors are either a [`TaskNode`] (which also implements
/// [`TaskVertex`] and is actually dispatched by the scheduler) or a pure
/// combinator whose [`resolve`](FutureNode::resolve) folds already-resolved
/// upstream values synchronously, with no caching or execution of its own.
pub trait FutureNode: Send + Sync {
    fn node_key(&self) -> NodeKey;

    /// Direct dependencies that must be resolved before this node can be.
    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>>;

    /// The canonical fragment contributed when this node appears inside
    /// another task's argument record (e.g. as a field value).
    fn identity_fragment(&self) -> CanonValue;

    /// Fold already-resolved upstream values into this node's own value.
    /// For a [`TaskNode`] this is a lookup of the value the scheduler
    /// placed after dispatch, not a recomputation.
    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError>;

    /// Human-readable label for logs and error messages.
    fn describe(&self) -> String;

    /// Non-`None` only for nodes the scheduler must actually dispatch.
    fn task_vertex(&self) -> Option<&dyn TaskVertex> {
        None
    }
}

/// A typed handle over a graph node, recovering a concrete `T` from the
/// type-erased [`ResolvedValues`] map once the graph has been run.
pub struct Future<T> {
    node: Arc<dyn FutureNode>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    pub fn from_node(node: Arc<dyn FutureNode>) -> Self {
        Future {
            node,
            _marker: PhantomData,
        }
    }

    pub fn node(&self) -> &Arc<dyn FutureNode> {
        &self.node
    }

    /// Recover the concrete value for this node from an already-populated
    /// resolved-values map (as produced by a completed `run_graph` call, or
    /// the scheduler's in-progress map while a run is ongoing).
    pub fn get(&self, values: &dyn ValueLookup) -> Result<Arc<T>, GantryError> {
        let key = self.node.node_key();
        let any = values
            .lookup(&key)
            .ok_or_else(|| GantryError::Graph(crate::graph::GraphError::Unresolved {
                node: self.node.describe(),
            }))?;
        any.downcast::<T>()
            .map_err(|_| GantryError::Graph(crate::graph::GraphError::TypeMismatch {
                node: self.node.describe(),
            }))
    }
}
