//! Shared handler state.

use std::sync::Arc;

use siege_catalog::ShardCatalog;

use crate::service::ScvService;

/// State available to every SCV handler.
pub struct ScvState<C: ShardCatalog> {
    /// The stream service.
    pub service: Arc<ScvService<C>>,
}

impl<C: ShardCatalog> ScvState<C> {
    /// Wrap a service.
    #[must_use]
    pub const fn new(service: Arc<ScvService<C>>) -> Self {
        Self { service }
    }
}

impl<C: ShardCatalog> Clone for ScvState<C> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}
