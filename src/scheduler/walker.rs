//! Leaves-first traversal of a built graph.
//!
//! Grounded on `turborepo-graph-utils::Walker`: one lightweight task per
//! vertex waits on a `broadcast` "done" signal from each of its
//! dependencies, then emits itself on a shared `mpsc` channel along with a
//! `oneshot` the scheduler uses to signal it back when finished, at which
//! point the vertex fires its own broadcast so its dependents can proceed.
//! A `watch`-channel cancel flag lets the scheduler stop the walk early
//! (the drain policy) without tearing down in-flight work.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::graph::BuiltGraph;

/// One vertex ready to run, plus the means to tell the walker it finished.
pub struct WalkItem {
    pub idx: NodeIndex,
    pub done: oneshot::Sender<()>,
}

/// Spawn the walk over `graph`, returning the channel it emits ready
/// vertices on. Drop the receiver (or flip `cancel` to `true`) to stop
/// emitting new work; vertices already waiting on a `WalkItem::done` are
/// unaffected.
pub fn walk(graph: Arc<BuiltGraph>, cancel: watch::Receiver<bool>) -> mpsc::Receiver<WalkItem> {
    let (tx, rx) = mpsc::channel(graph.node_count().max(1));

    let done_tx: HashMap<NodeIndex, broadcast::Sender<()>> = graph
        .indices()
        .map(|idx| (idx, broadcast::channel::<()>(1).0))
        .collect();
    let done_tx = Arc::new(done_tx);

    for idx in graph.indices() {
        let deps: Vec<NodeIndex> = graph.successors(idx).collect();
        let dep_rxs: Vec<broadcast::Receiver<()>> =
            deps.iter().map(|d| done_tx[d].subscribe()).collect();
        let my_tx = done_tx[&idx].clone();
        let tx = tx.clone();
        let mut cancel = cancel.clone();

        tokio::spawn(async move {
            if *cancel.borrow() {
                return;
            }
            for mut dep_rx in dep_rxs {
                tokio::select! {
                    _ = dep_rx.recv() => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return;
                        }
                    }
                }
            }
            if *cancel.borrow() {
                return;
            }

            let (done, done_rx) = oneshot::channel();
            if tx.send(WalkItem { idx, done }).await.is_err() {
                return;
            }
            // A dropped sender (the scheduler crashed without signaling
            // completion) is treated the same as an explicit completion:
            // dependents should not hang forever.
            let _ = done_rx.await;
            let _ = my_tx.send(());
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::{Const, Future, FutureNode, FutureList};
    use crate::graph::GraphBuilder;

    #[tokio::test]
    async fn emits_leaves_before_their_dependents() {
        let a = Future::<i64>::from_node(Const::new(1i64));
        let b = Future::<i64>::from_node(Const::new(2i64));
        let list = FutureList::new(vec![a, b]);
        let built = Arc::new(GraphBuilder::build(list).unwrap());

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut rx = walk(built.clone(), cancel_rx);

        let mut order = Vec::new();
        while let Some(item) = rx.recv().await {
            order.push(built.node(item.idx).describe());
            let _ = item.done.send(());
        }
        // the two Const leaves must both precede the FutureList root
        let root_pos = order.iter().position(|d| d.starts_with("<list")).unwrap();
        assert_eq!(root_pos, order.len() - 1);
    }

    #[tokio::test]
    async fn cancel_stops_new_emissions() {
        let a = Future::<i64>::from_node(Const::new(1i64));
        let b = Future::<i64>::from_node(Const::new(2i64));
        let list = FutureList::new(vec![a, b]);
        let built = Arc::new(GraphBuilder::build(list).unwrap());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let mut rx = walk(built, cancel_rx);

        assert!(rx.recv().await.is_none());
    }
}
