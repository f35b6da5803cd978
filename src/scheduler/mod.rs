//! Dispatches a built graph leaves-first, respecting the configured
//! concurrency and per-slot rate limits, and drains (stops starting new
//! work but lets in-flight work finish) on the first failure.
//!
//! Grounded on `engine::execute::Engine::execute`: an `mpsc` channel from
//! the walker feeds a `Semaphore`-gated dispatch loop, with completions
//! tracked until the whole graph has been visited. `gantry` generalizes
//! the teacher's single global semaphore into one additional semaphore per
//! rate-limited slot a task declares via `task_channel`.

mod stats;
mod walker;

pub use stats::{RunStats, TaskStats};
pub use walker::WalkItem;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::error::GantryError;
use crate::executor::{BoxFuture, Executor};
use crate::future::{AnyValue, FutureNode, NodeKey, ResolvedValues, TaskContext, TaskOrigin};
use crate::graph::{BuiltGraph, GraphBuilder};
use crate::process::SelfInvoke;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("graph run aborted after a task failure: {0}")]
    Aborted(String),

    /// A worker running a vertex panicked or the executor otherwise failed
    /// to deliver a result for it — spec §7's `DispatchError`, "treated like
    /// `TaskFailed` for the current task."
    #[error("executor failed to run `{node}`: {reason}")]
    DispatchFailed { node: String, reason: String },
}

/// Run the graph rooted at `root` to completion.
///
/// Returns the full map of resolved values (keyed by [`NodeKey`], readable
/// through each [`crate::future::Future<T>`] handle the caller still
/// holds) plus per-task timing and cache-origin statistics. On the first
/// task failure, no new work is started; already-dispatched tasks are
/// allowed to finish, and the original error is returned once the graph
/// has drained.
#[tracing::instrument(skip(root, cache, config, executor, self_invoke))]
pub async fn run_graph(
    root: Arc<dyn FutureNode>,
    cache: Arc<CacheStore>,
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    self_invoke: Option<Arc<dyn SelfInvoke>>,
) -> Result<(ResolvedValues, RunStats), GantryError> {
    let built = Arc::new(GraphBuilder::build(root)?);
    info!(vertices = built.node_count(), "starting graph run");

    let known_slots: std::collections::HashSet<&str> = built
        .indices()
        .filter_map(|idx| built.node(idx).task_vertex())
        .flat_map(|v| std::iter::once(v.task_name()).chain(v.task_channel().iter().copied()))
        .collect();
    config.validate_slots(&known_slots)?;

    let values: Arc<DashMap<NodeKey, AnyValue>> = Arc::new(DashMap::new());
    let stats = Arc::new(Mutex::new(RunStats::new()));
    let failure: Arc<Mutex<Option<GantryError>>> = Arc::new(Mutex::new(None));

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let global_sem = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let slot_sems: Arc<DashMap<String, Arc<Semaphore>>> = Arc::new(DashMap::new());
    let config = Arc::new(config);

    let mut walker_rx = walker::walk(built.clone(), cancel_rx.clone());
    // Grounded on `engine::execute::Engine::execute`'s
    // `FuturesUnordered<JoinHandle<_>>` drain: vertices complete in
    // whatever order the executor finishes them in, not the order they
    // were dispatched.
    let mut handles: FuturesUnordered<BoxFuture<()>> = FuturesUnordered::new();

    while let Some(item) = walker_rx.recv().await {
        let built = built.clone();
        let values = values.clone();
        let stats = stats.clone();
        let failure = failure.clone();
        let cache = cache.clone();
        let config = config.clone();
        let self_invoke = self_invoke.clone();
        let global_sem = global_sem.clone();
        let slot_sems = slot_sems.clone();
        let cancel_tx = cancel_tx.clone();
        let cancel_rx = cancel_rx.clone();

        let fut: BoxFuture<()> = Box::pin(async move {
            process_vertex(
                item, &built, &values, &stats, &failure, &cache, &config, &self_invoke,
                &global_sem, &slot_sems, &cancel_tx, &cancel_rx,
            )
            .await;
        });
        let handle = executor.spawn(fut);
        let cancel_tx = cancel_tx.clone();
        let failure = failure.clone();
        handles.push(Box::pin(async move {
            if let Err(join_err) = handle.await {
                warn!(error = %join_err, "a scheduled vertex task panicked");
                let mut guard = failure.lock().unwrap();
                if guard.is_none() {
                    *guard = Some(GantryError::Scheduler(SchedulerError::DispatchFailed {
                        node: "<unknown, executor lost the vertex>".to_string(),
                        reason: join_err.to_string(),
                    }));
                    let _ = cancel_tx.send(true);
                }
            }
        }));
    }

    while handles.next().await.is_some() {}

    let stats = stats.lock().unwrap().clone();

    if let Some(err) = failure.lock().unwrap().take() {
        error!(error = %err, "graph run failed");
        return Err(err);
    }

    let values: ResolvedValues = values
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    Ok((values, stats))
}

#[allow(clippy::too_many_arguments)]
async fn process_vertex(
    item: WalkItem,
    built: &Arc<BuiltGraph>,
    values: &Arc<DashMap<NodeKey, AnyValue>>,
    stats: &Arc<Mutex<RunStats>>,
    failure: &Arc<Mutex<Option<GantryError>>>,
    cache: &Arc<CacheStore>,
    config: &Arc<EngineConfig>,
    self_invoke: &Option<Arc<dyn SelfInvoke>>,
    global_sem: &Arc<Semaphore>,
    slot_sems: &Arc<DashMap<String, Arc<Semaphore>>>,
    cancel_tx: &watch::Sender<bool>,
    cancel_rx: &watch::Receiver<bool>,
) {
    if *cancel_rx.borrow() {
        let _ = item.done.send(());
        return;
    }

    let node = built.node(item.idx).clone();

    let outcome = if let Some(task_vertex) = node.task_vertex() {
        let task_name = task_vertex.task_name();
        let task_id = task_vertex.task_id().to_string();
        stats.lock().unwrap().record_queued(task_name, &task_id, Instant::now());

        let _global_permit = global_sem.acquire().await;
        let mut slot_permits = Vec::new();
        // Per spec §4.5: a task's slot set is {task_name} ∪ task_channel —
        // rate_limits may be keyed on either.
        let slots = std::iter::once(task_vertex.task_name())
            .chain(task_vertex.task_channel().iter().copied());
        for slot in slots {
            if let Some(limit) = config.rate_limits.limit_for(slot) {
                let sem = slot_sems
                    .entry(slot.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
                    .clone();
                slot_permits.push(sem.acquire_owned().await);
            }
        }

        if *cancel_rx.borrow() {
            let _ = item.done.send(());
            return;
        }

        stats.lock().unwrap().record_started(task_name, &task_id, Instant::now());
        debug!(task_name, task_id, "dispatching task");

        // Per spec §4.5: a task's own prefix takes precedence over any
        // slot-scoped prefix the caller configured, and a slot may be keyed
        // on the task_name itself as well as a task_channel.
        let prefix = task_vertex.task_prefix_command().or_else(|| {
            std::iter::once(task_vertex.task_name())
                .chain(task_vertex.task_channel().iter().copied())
                .find_map(|slot| config.prefixes.prefix_for(slot).map(str::to_string))
        });

        let ctx = TaskContext::new(values.as_ref());
        let result = task_vertex
            .dispatch_cached(ctx, cache, prefix.as_deref(), self_invoke.as_deref())
            .await;
        match result {
            Ok((value, origin)) => {
                stats
                    .lock()
                    .unwrap()
                    .record_finished(task_name, &task_id, Instant::now(), origin);
                if origin == TaskOrigin::Cached {
                    debug!(task_name, task_id, "cache hit");
                }
                Ok((node.node_key(), value))
            }
            Err(e) => Err(e),
        }
    } else {
        match node.resolve(values.as_ref()) {
            Ok(value) => Ok((node.node_key(), value)),
            Err(e) => Err(e),
        }
    };

    match outcome {
        Ok((key, value)) => {
            values.insert(key, value);
        }
        Err(e) => {
            let mut guard = failure.lock().unwrap();
            if guard.is_none() {
                error!(node = %node.describe(), error = %e, "task failed, draining remaining work");
                *guard = Some(e);
                let _ = cancel_tx.send(true);
            }
        }
    }

    let _ = item.done.send(());
}
