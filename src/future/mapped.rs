use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AnyValue, Future, FutureNode, NodeKey, ResolvedValues, ValueLookup};
use crate::error::GantryError;
use crate::graph::GraphError;
use crate::identity::CanonValue;

/// Projects one element out of a future resolving to `Vec<Arc<T>>` by
/// position, without re-running whatever produced the list. Used when one
/// task's output feeds many independent downstream tasks, each wanting a
/// single element rather than the whole collection (so the graph can run
/// the downstream tasks concurrently once the shared element is ready).
pub struct IndexedFuture<T> {
    base: Future<Vec<Arc<T>>>,
    index: usize,
}

impl<T: Send + Sync + 'static> IndexedFuture<T> {
    pub fn new(base: Future<Vec<Arc<T>>>, index: usize) -> Arc<Self> {
        Arc::new(IndexedFuture { base, index })
    }
}

impl<T: Send + Sync + 'static> FutureNode for IndexedFuture<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::Ephemeral(self as *const Self as *const () as usize)
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        vec![self.base.node().clone()]
    }

    fn identity_fragment(&self) -> CanonValue {
        CanonValue::Seq(vec![
            self.base.node().identity_fragment(),
            CanonValue::Int(self.index as i64),
        ])
    }

    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        let list = self.base.get(values)?;
        let item = list.get(self.index).ok_or_else(|| {
            GantryError::Graph(GraphError::IndexOutOfRange {
                node: self.describe(),
                index: self.index,
                len: list.len(),
            })
        })?;
        Ok(item.clone())
    }

    fn describe(&self) -> String {
        format!("{}[{}]", self.base.node().describe(), self.index)
    }
}

/// Projects one entry out of a future resolving to
/// `BTreeMap<String, Arc<T>>` by key. See [`IndexedFuture`] for the
/// motivating scenario.
pub struct KeyedFuture<T> {
    base: Future<BTreeMap<String, Arc<T>>>,
    key: String,
}

impl<T: Send + Sync + 'static> KeyedFuture<T> {
    pub fn new(base: Future<BTreeMap<String, Arc<T>>>, key: impl Into<String>) -> Arc<Self> {
        Arc::new(KeyedFuture {
            base,
            key: key.into(),
        })
    }
}

impl<T: Send + Sync + 'static> FutureNode for KeyedFuture<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::Ephemeral(self as *const Self as *const () as usize)
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        vec![self.base.node().clone()]
    }

    fn identity_fragment(&self) -> CanonValue {
        CanonValue::Seq(vec![
            self.base.node().identity_fragment(),
            CanonValue::Str(self.key.clone()),
        ])
    }

    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        let map = self.base.get(values)?;
        let item = map.get(&self.key).ok_or_else(|| {
            GantryError::Graph(GraphError::KeyNotFound {
                node: self.describe(),
                key: self.key.clone(),
            })
        })?;
        Ok(item.clone())
    }

    fn describe(&self) -> String {
        format!("{}[{:?}]", self.base.node().describe(), self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Const;

    /// Seeds `values` with each future's resolved output under its own node
    /// key, leaves first, matching what the scheduler does before folding a
    /// dependent node (`resolve` looks values up, it does not recurse).
    fn seed(values: &mut ResolvedValues, node: &Arc<dyn FutureNode>) {
        let resolved = node.resolve(values).unwrap();
        values.insert(node.node_key(), resolved);
    }

    #[test]
    fn indexed_future_picks_out_one_element() {
        let a = Future::<i64>::from_node(Const::new(10i64));
        let b = Future::<i64>::from_node(Const::new(20i64));
        let list = Future::<Vec<Arc<i64>>>::from_list(vec![a.clone(), b.clone()]);
        let picked = Future::<i64>::from_node(IndexedFuture::new(list.clone(), 1));

        let mut values = ResolvedValues::new();
        seed(&mut values, a.node());
        seed(&mut values, b.node());
        seed(&mut values, list.node());
        let v = picked.node().resolve(&values).unwrap();
        assert_eq!(*v.downcast::<i64>().unwrap(), 20);
    }

    #[test]
    fn indexed_future_out_of_range_is_an_error() {
        let a = Future::<i64>::from_node(Const::new(10i64));
        let list = Future::<Vec<Arc<i64>>>::from_list(vec![a.clone()]);
        let picked = IndexedFuture::new(list.clone(), 5);

        let mut values = ResolvedValues::new();
        seed(&mut values, a.node());
        seed(&mut values, list.node());
        let err = picked.resolve(&values).unwrap_err();
        assert!(matches!(
            err,
            GantryError::Graph(GraphError::IndexOutOfRange { .. })
        ));
    }
}
