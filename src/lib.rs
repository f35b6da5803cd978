//! `gantry` — a lightweight, content-addressed task-graph execution engine.
//!
//! Users define units of computation ("tasks") that declare upstream
//! dependencies by composition (see [`future`]); [`scheduler::run_graph`]
//! discovers the transitive dependency graph, runs tasks leaves-first under
//! configurable concurrency limits, and persists each task's output in a
//! content-addressed on-disk cache ([`cache`]) so unchanged subtrees are
//! replayed rather than recomputed on the next run.
//!
//! The pieces compose roughly like this:
//!
//! - [`future`] — the `Task`/`Const`/`FutureList`/`FutureDict`/indexed-future
//!   composition model, and the [`future::Task`] trait users implement.
//! - [`identity`] — canonicalises a task's declared argument record into a
//!   stable `task_id`, the cache key.
//! - [`graph`] — walks a root future's reachable closure into a DAG and
//!   checks it for cycles.
//! - [`cache`] — durable, content-addressed storage of task outputs.
//! - [`scheduler`] — the concurrent executor tying the above together.
//! - [`process`] — subprocess dispatch for tasks wrapped by a prefix command.
//! - [`codec`] — the value (de)serialization contract the cache relies on.
//! - [`executor`] — the minimal contract task bodies are spawned through.
//! - [`config`] — explicit, caller-constructed run configuration.
//! - [`error`] — the crate's composed error type.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod graph;
pub mod identity;
pub mod process;
pub mod scheduler;

pub use cache::{CacheEntryPaths, CacheScope, CacheStore};
pub use codec::ValueCodec;
pub use config::{EngineConfig, PrefixConfig, RateLimits};
pub use error::GantryError;
pub use executor::{Executor, TokioExecutor};
pub use future::{
    Const, Future, FutureDict, FutureList, FutureNode, IndexedFuture, KeyedFuture, Task,
    TaskContext, TaskNode, TaskOrigin, TaskVertex,
};
pub use graph::{BuiltGraph, GraphBuilder, GraphError};
pub use process::SelfInvoke;
pub use scheduler::{run_graph, RunStats, SchedulerError};

#[cfg(feature = "json-codec")]
pub use codec::JsonCodec;
