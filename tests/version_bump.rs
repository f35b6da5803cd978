//! "Modify a task's source, then re-run": a task's `task_name` changing is
//! how `gantry` models a new body version (same spec.md convention used
//! by `TaskOrigin`/`task_id` throughout). Swapping in a differently-named
//! leaf changes that leaf's `task_id` and, transitively, every ancestor
//! whose args embed the leaf's identity — but a sibling that never
//! depended on the leaf stays cached untouched.

use std::sync::Arc;

use async_trait::async_trait;
use gantry::identity::{ArgRecord, CanonValue};
use gantry::{
    CacheScope, CacheStore, EngineConfig, Future, FutureList, FutureNode, GantryError, JsonCodec,
    Task, TaskContext, TaskNode, TaskOrigin, TokioExecutor,
};

struct LeafV1;

#[async_trait]
impl Task for LeafV1 {
    type Output = i64;
    type Codec = JsonCodec;

    fn task_name(&self) -> &'static str {
        "Leaf"
    }

    fn args(&self) -> ArgRecord {
        ArgRecord::new()
    }

    async fn run(&self, _ctx: TaskContext<'_>) -> Result<i64, GantryError> {
        Ok(2)
    }
}

/// Stands in for "the same conceptual leaf, body modified": a distinct
/// `task_name` is how a new body version is declared, per spec.md's
/// versioning convention.
struct LeafV2;

#[async_trait]
impl Task for LeafV2 {
    type Output = i64;
    type Codec = JsonCodec;

    fn task_name(&self) -> &'static str {
        "LeafV2"
    }

    fn args(&self) -> ArgRecord {
        ArgRecord::new()
    }

    async fn run(&self, _ctx: TaskContext<'_>) -> Result<i64, GantryError> {
        Ok(3)
    }
}

struct Parent {
    leaf: Future<i64>,
}

#[async_trait]
impl Task for Parent {
    type Output = i64;
    type Codec = JsonCodec;

    fn task_name(&self) -> &'static str {
        "Parent"
    }

    fn args(&self) -> ArgRecord {
        ArgRecord::new()
            .field("leaf", self.leaf.node().identity_fragment())
            .unwrap()
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        vec![self.leaf.node().clone()]
    }

    async fn run(&self, ctx: TaskContext<'_>) -> Result<i64, GantryError> {
        Ok(*ctx.get(&self.leaf)? * 10)
    }
}

struct Sibling;

#[async_trait]
impl Task for Sibling {
    type Output = i64;
    type Codec = JsonCodec;

    fn task_name(&self) -> &'static str {
        "Sibling"
    }

    fn args(&self) -> ArgRecord {
        ArgRecord::new().field("tag", CanonValue::Int(99)).unwrap()
    }

    async fn run(&self, _ctx: TaskContext<'_>) -> Result<i64, GantryError> {
        Ok(99)
    }
}

fn graph(use_v2_leaf: bool) -> (Future<i64>, Future<i64>) {
    let leaf: Future<i64> = if use_v2_leaf {
        Future::from_node(Arc::new(TaskNode::new(Arc::new(LeafV2))))
    } else {
        Future::from_node(Arc::new(TaskNode::new(Arc::new(LeafV1))))
    };
    let parent = Future::<i64>::from_node(Arc::new(TaskNode::new(Arc::new(Parent { leaf }))));
    let sibling = Future::<i64>::from_node(Arc::new(TaskNode::new(Arc::new(Sibling))));
    (parent, sibling)
}

#[tokio::test]
async fn bumping_a_leafs_version_only_recomputes_its_ancestors() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CacheStore::new(CacheScope::open(dir.path()).await.unwrap()));

    let (parent, sibling) = graph(false);
    let root = FutureList::new(vec![parent.clone(), sibling.clone()]);
    let (values, stats) = gantry::run_graph(
        root,
        cache.clone(),
        EngineConfig::new(4),
        Arc::new(TokioExecutor),
        None,
    )
    .await
    .unwrap();
    assert_eq!(*parent.get(&values).unwrap(), 20);
    assert_eq!(*sibling.get(&values).unwrap(), 99);
    assert_eq!(stats.len(), 3); // Leaf, Parent, Sibling
    assert!(stats
        .iter()
        .all(|(_, s)| s.origin == Some(TaskOrigin::Executed)));

    // "Modify the leaf's source": swap in a differently-named leaf task.
    let (parent2, sibling2) = graph(true);
    let root2 = FutureList::new(vec![parent2.clone(), sibling2.clone()]);
    let (values2, stats2) = gantry::run_graph(
        root2,
        cache,
        EngineConfig::new(4),
        Arc::new(TokioExecutor),
        None,
    )
    .await
    .unwrap();

    assert_eq!(*parent2.get(&values2).unwrap(), 30);
    assert_eq!(*sibling2.get(&values2).unwrap(), 99);
    assert_eq!(stats2.len(), 3); // LeafV2, Parent (new id), Sibling (unchanged id)

    let sibling_stat = stats2
        .iter()
        .find(|((name, _id), _)| name == "Sibling")
        .map(|(_, s)| s)
        .unwrap();
    assert_eq!(sibling_stat.origin, Some(TaskOrigin::Cached));

    let leaf_v2_stat = stats2
        .iter()
        .find(|((name, _id), _)| name == "LeafV2")
        .map(|(_, s)| s)
        .unwrap();
    assert_eq!(leaf_v2_stat.origin, Some(TaskOrigin::Executed));

    let parent_stat = stats2
        .iter()
        .find(|((name, _id), _)| name == "Parent")
        .map(|(_, s)| s)
        .unwrap();
    assert_eq!(parent_stat.origin, Some(TaskOrigin::Executed));
}
