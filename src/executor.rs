//! The execution contract the scheduler dispatches task bodies through.
//!
//! Any concrete type satisfying [`Executor`] can run a scheduler; `gantry`
//! ships [`TokioExecutor`] as the default, analogous to the teacher always
//! running its engine execution loop on its own `tokio` runtime.

use std::future::Future as StdFuture;
use std::pin::Pin;

use tokio::task::JoinHandle;

/// A boxed, type-erased future, the shape `Executor::spawn` needs to accept
/// heterogeneous task bodies uniformly.
pub type BoxFuture<T> = Pin<Box<dyn StdFuture<Output = T> + Send>>;

/// Spawns futures onto some underlying runtime.
pub trait Executor: Send + Sync {
    fn spawn(&self, fut: BoxFuture<()>) -> JoinHandle<()>;
}

/// Spawns onto the ambient Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn spawn(&self, fut: BoxFuture<()>) -> JoinHandle<()> {
        tokio::task::spawn(fut)
    }
}
