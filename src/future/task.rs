use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{AnyValue, FutureNode, NodeKey, ValueLookup};
use crate::cache::CacheStore;
use crate::codec::ValueCodec;
use crate::config::UsageError;
use crate::error::GantryError;
use crate::identity::{self, ArgRecord, CanonValue};
use crate::process::{self, SelfInvoke};

/// Whether a task's value came from the cache or from actually running it
/// this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    Cached,
    Executed,
}

/// A unit of cacheable work.
///
/// A task is defined by implementing this trait on a plain struct whose
/// fields are the task's construction arguments. [`Task::args`] declares
/// those arguments explicitly as an [`ArgRecord`]; `gantry` never inspects
/// struct fields by reflection.
///
/// `Output`/`Codec` tie the task to the codec used to persist its result:
/// most tasks can simply set `type Codec = JsonCodec;` (behind the
/// `json-codec` feature); a task needing a different wire format supplies
/// its own [`ValueCodec`] impl instead.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Codec: ValueCodec<Self::Output> + Send + Sync;

    /// A stable name for this task type, distinct across all task types
    /// sharing a cache (mixed into the `task_id` digest).
    fn task_name(&self) -> &'static str;

    /// The declared argument record this instance was constructed with.
    fn args(&self) -> ArgRecord;

    /// Upstream futures this task reads from in its `run` body. Declaring
    /// these explicitly (rather than discovering them by introspecting
    /// `run`) is what lets the graph builder discover the full dependency
    /// graph before anything executes.
    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        Vec::new()
    }

    /// Named rate-limit slots this task occupies while running, beyond the
    /// global concurrency limit. Empty means no per-task-name limiting.
    fn task_channel(&self) -> &'static [&'static str] {
        &[]
    }

    /// An external command prefix (e.g. a container or sandbox wrapper)
    /// the process dispatcher should prepend to any subprocess this task
    /// spawns. `None` means run the task's own process unwrapped.
    fn task_prefix_command(&self) -> Option<&str> {
        None
    }

    /// Opaque compression hint carried through to the cache's metadata
    /// side-file. `gantry` never interprets this value itself.
    fn task_compress_level(&self) -> Option<i32> {
        None
    }

    async fn run(&self, ctx: TaskContext<'_>) -> Result<Self::Output, GantryError>;
}

/// Context handed to a running task's `run` body.
pub struct TaskContext<'a> {
    values: &'a dyn ValueLookup,
}

impl<'a> TaskContext<'a> {
    pub fn new(values: &'a dyn ValueLookup) -> Self {
        TaskContext { values }
    }

    /// Look up the resolved value of an upstream future declared via
    /// [`Task::upstreams`].
    pub fn get<T: Send + Sync + 'static>(
        &self,
        future: &super::Future<T>,
    ) -> Result<Arc<T>, GantryError> {
        future.get(self.values)
    }
}

/// Dispatch-facing view of a [`TaskNode`], used by the scheduler without
/// needing to know the task's concrete output type.
#[async_trait]
pub trait TaskVertex: Send + Sync {
    /// Check the cache, and on a miss, either run the task in-process or,
    /// when `prefix` is `Some` (the task's own `task_prefix_command`, or a
    /// channel prefix the scheduler resolved), dispatch it as a subprocess
    /// via `self_invoke` per spec §4.6. Returns the resolved value
    /// (type-erased) and whether it came from cache.
    async fn dispatch_cached(
        &self,
        ctx: TaskContext<'_>,
        cache: &CacheStore,
        prefix: Option<&str>,
        self_invoke: Option<&dyn SelfInvoke>,
    ) -> Result<(AnyValue, TaskOrigin), GantryError>;

    fn task_name(&self) -> &'static str;
    fn task_id(&self) -> &str;
    fn task_channel(&self) -> &'static [&'static str];
    fn task_prefix_command(&self) -> Option<String>;
    fn task_compress_level(&self) -> Option<i32>;
}

/// The graph vertex wrapping a user's [`Task`] implementation.
pub struct TaskNode<T: Task> {
    inner: Arc<T>,
    task_id: String,
}

impl<T: Task> TaskNode<T> {
    pub fn new(inner: Arc<T>) -> Self {
        let task_id = identity::task_id(inner.task_name(), &inner.args());
        TaskNode { inner, task_id }
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }
}

impl<T: Task> FutureNode for TaskNode<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::Task {
            task_name: self.inner.task_name(),
            task_id: self.task_id.clone(),
        }
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        self.inner.upstreams()
    }

    fn identity_fragment(&self) -> CanonValue {
        CanonValue::FutureRef {
            name_or_const: self.inner.task_name().to_string(),
            id_or_value: self.task_id.clone().into_bytes(),
        }
    }

    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        values
            .lookup(&self.node_key())
            .ok_or_else(|| {
                GantryError::Graph(crate::graph::GraphError::Unresolved {
                    node: self.describe(),
                })
            })
    }

    fn describe(&self) -> String {
        format!(
            "{}#{}",
            self.inner.task_name(),
            &self.task_id[..12.min(self.task_id.len())]
        )
    }

    fn task_vertex(&self) -> Option<&dyn TaskVertex> {
        Some(self)
    }
}

#[async_trait]
impl<T: Task> TaskVertex for TaskNode<T> {
    async fn dispatch_cached(
        &self,
        ctx: TaskContext<'_>,
        cache: &CacheStore,
        prefix: Option<&str>,
        self_invoke: Option<&dyn SelfInvoke>,
    ) -> Result<(AnyValue, TaskOrigin), GantryError> {
        let task_name = self.inner.task_name();
        if let Some(cached) = cache
            .load::<T::Output, T::Codec>(task_name, &self.task_id)
            .await?
        {
            trace!(task = task_name, id = %self.task_id, "cache hit");
            return Ok((Arc::new(cached) as AnyValue, TaskOrigin::Cached));
        }

        let value = match prefix {
            None => {
                let value = self.inner.run(ctx).await?;
                cache
                    .store::<T::Output, T::Codec>(
                        task_name,
                        &self.task_id,
                        &value,
                        self.inner.task_compress_level(),
                        identity::args_json(&self.inner.args()),
                    )
                    .await?;
                value
            }
            Some(prefix_cmd) => {
                let self_invoke = self_invoke.ok_or_else(|| {
                    GantryError::from(UsageError::PrefixWithoutSelfInvoke {
                        task_name: task_name.to_string(),
                        task_id: self.task_id.clone(),
                    })
                })?;
                cache.scratch_dir(task_name, &self.task_id).await?;
                let paths = cache.paths_for(task_name, &self.task_id);
                let command =
                    self_invoke.command_line(task_name, &self.task_id, cache.scope().root());
                debug!(task_name, id = %self.task_id, %command, prefix = prefix_cmd, "dispatching via prefix command");
                process::dispatch(&command, Some(prefix_cmd), &paths.stdout, &paths.stderr).await?;
                cache
                    .load::<T::Output, T::Codec>(task_name, &self.task_id)
                    .await?
                    .ok_or_else(|| {
                        GantryError::from(crate::process::ProcessError::NoCacheEntryAfterDispatch {
                            task_name: task_name.to_string(),
                            task_id: self.task_id.clone(),
                        })
                    })?
            }
        };
        Ok((Arc::new(value) as AnyValue, TaskOrigin::Executed))
    }

    fn task_name(&self) -> &'static str {
        self.inner.task_name()
    }

    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn task_channel(&self) -> &'static [&'static str] {
        self.inner.task_channel()
    }

    fn task_prefix_command(&self) -> Option<String> {
        self.inner.task_prefix_command().map(str::to_owned)
    }

    fn task_compress_level(&self) -> Option<i32> {
        self.inner.task_compress_level()
    }
}
