use std::sync::Arc;

use crate::materialize::Materializer;
use crate::store::ContentStore;
use crate::strategy::Strategy;

/// Everything a request handler needs. The store is reached through the
/// materializer so both always share one backend.
pub struct AppState<S> {
    pub materializer: Materializer,
    pub strategy: Arc<S>,
}

impl<S> AppState<S> {
    pub fn new(materializer: Materializer, strategy: S) -> Self {
        Self {
            materializer,
            strategy: Arc::new(strategy),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        self.materializer.store()
    }
}

impl<S: Strategy> AppState<S> {
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

// Derived Clone would require `S: Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            materializer: self.materializer.clone(),
            strategy: Arc::clone(&self.strategy),
        }
    }
}
