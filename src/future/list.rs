use std::sync::Arc;

use super::{AnyValue, Future, FutureNode, NodeKey, ResolvedValues, ValueLookup};
use crate::error::GantryError;
use crate::identity::CanonValue;

/// A future aggregating a fixed, ordered sequence of other futures of the
/// same output type. Resolves to `Arc<Vec<Arc<T>>>`, preserving the order
/// the items were declared in (order is significant here, unlike the
/// key-sorted [`super::FutureDict`]).
pub struct FutureList<T> {
    items: Vec<Future<T>>,
}

impl<T: Send + Sync + 'static> FutureList<T> {
    pub fn new(items: Vec<Future<T>>) -> Arc<Self> {
        Arc::new(FutureList { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Send + Sync + 'static> FutureNode for FutureList<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::Ephemeral(self as *const Self as *const () as usize)
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        self.items.iter().map(|f| f.node().clone()).collect()
    }

    fn identity_fragment(&self) -> CanonValue {
        CanonValue::Seq(
            self.items
                .iter()
                .map(|f| f.node().identity_fragment())
                .collect(),
        )
    }

    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        let mut out: Vec<Arc<T>> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            out.push(item.get(values)?);
        }
        Ok(Arc::new(out))
    }

    fn describe(&self) -> String {
        format!("<list of {}>", self.items.len())
    }
}

impl<T: Send + Sync + 'static> Future<Vec<Arc<T>>> {
    /// Build a future over a list without first allocating the
    /// `FutureList` node explicitly.
    pub fn from_list(items: Vec<Future<T>>) -> Self {
        Future::from_node(FutureList::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Const;

    #[test]
    fn resolves_items_in_declared_order() {
        let a = Future::<i64>::from_node(Const::new(1i64));
        let b = Future::<i64>::from_node(Const::new(2i64));
        // `resolve` looks up each upstream's already-resolved value by node
        // key (what the scheduler does after running the leaves first), so
        // the fixture seeds the map the same way before resolving the list.
        let mut values = ResolvedValues::new();
        let a_value = a.node().resolve(&values).unwrap();
        values.insert(a.node().node_key(), a_value);
        let b_value = b.node().resolve(&values).unwrap();
        values.insert(b.node().node_key(), b_value);

        let list = FutureList::new(vec![a, b]);
        let resolved = list.resolve(&values).unwrap();
        let resolved: Arc<Vec<Arc<i64>>> = resolved.downcast().unwrap();
        assert_eq!(resolved.iter().map(|v| **v).collect::<Vec<_>>(), vec![1, 2]);
    }
}
