use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AnyValue, Future, FutureNode, NodeKey, ResolvedValues, ValueLookup};
use crate::error::GantryError;
use crate::identity::CanonValue;

/// A future aggregating a fixed mapping of keys to futures of the same
/// output type. Resolves to `Arc<BTreeMap<String, Arc<T>>>`; keys are
/// sorted so the resolved map and its identity fragment are both
/// independent of construction order.
pub struct FutureDict<T> {
    items: BTreeMap<String, Future<T>>,
}

impl<T: Send + Sync + 'static> FutureDict<T> {
    pub fn new(items: BTreeMap<String, Future<T>>) -> Arc<Self> {
        Arc::new(FutureDict { items })
    }

    pub fn get(&self, key: &str) -> Option<&Future<T>> {
        self.items.get(key)
    }
}

impl<T: Send + Sync + 'static> FutureNode for FutureDict<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::Ephemeral(self as *const Self as *const () as usize)
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        self.items.values().map(|f| f.node().clone()).collect()
    }

    fn identity_fragment(&self) -> CanonValue {
        CanonValue::Map(
            self.items
                .iter()
                .map(|(k, f)| (k.clone(), f.node().identity_fragment()))
                .collect(),
        )
    }

    fn resolve(&self, values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        let mut out: BTreeMap<String, Arc<T>> = BTreeMap::new();
        for (key, item) in &self.items {
            out.insert(key.clone(), item.get(values)?);
        }
        Ok(Arc::new(out))
    }

    fn describe(&self) -> String {
        format!("<dict of {}>", self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Const;

    #[test]
    fn resolves_keys_in_sorted_order() {
        let b = Future::<i64>::from_node(Const::new(2i64));
        let a = Future::<i64>::from_node(Const::new(1i64));

        // Seed the map with each leaf's resolved value under its own node
        // key first, matching what the scheduler does before folding an
        // aggregate future (`resolve` does a lookup, not a recursive call).
        let mut values = ResolvedValues::new();
        let a_value = a.node().resolve(&values).unwrap();
        values.insert(a.node().node_key(), a_value);
        let b_value = b.node().resolve(&values).unwrap();
        values.insert(b.node().node_key(), b_value);

        let mut items = BTreeMap::new();
        items.insert("b".to_string(), b);
        items.insert("a".to_string(), a);
        let dict = FutureDict::new(items);
        let resolved = dict.resolve(&values).unwrap();
        let resolved: Arc<BTreeMap<String, Arc<i64>>> = resolved.downcast().unwrap();
        assert_eq!(*resolved["a"], 1);
        assert_eq!(*resolved["b"], 2);
    }
}
