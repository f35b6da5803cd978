use std::sync::Arc;

use super::{AnyValue, FutureNode, NodeKey, ResolvedValues, ValueLookup};
use crate::error::GantryError;
use crate::identity::{CanonValue, ToCanon};

/// A future whose value is already available at graph-construction time.
/// Useful for feeding a literal into a task's declared upstreams alongside
/// actual `Task` futures.
pub struct Const<T> {
    value: Arc<T>,
}

impl<T: ToCanon + Send + Sync + 'static> Const<T> {
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Const {
            value: Arc::new(value),
        })
    }
}

impl<T: ToCanon + Send + Sync + 'static> FutureNode for Const<T> {
    fn node_key(&self) -> NodeKey {
        NodeKey::ephemeral_of(&self.value)
    }

    fn upstreams(&self) -> Vec<Arc<dyn FutureNode>> {
        Vec::new()
    }

    fn identity_fragment(&self) -> CanonValue {
        self.value.to_canon()
    }

    fn resolve(&self, _values: &dyn ValueLookup) -> Result<AnyValue, GantryError> {
        Ok(self.value.clone())
    }

    fn describe(&self) -> String {
        "<const>".to_string()
    }
}
