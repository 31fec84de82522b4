//! Shared handler state.

use std::sync::Arc;

use siege_catalog::Catalog;

use crate::scv_client::ScvClient;
use crate::service::CommandCenter;

/// State available to every command center handler.
pub struct CcState<C: Catalog, S: ScvClient> {
    /// The command center.
    pub cc: Arc<CommandCenter<C, S>>,
}

impl<C: Catalog, S: ScvClient> CcState<C, S> {
    /// Wrap a command center.
    #[must_use]
    pub const fn new(cc: Arc<CommandCenter<C, S>>) -> Self {
        Self { cc }
    }
}

impl<C: Catalog, S: ScvClient> Clone for CcState<C, S> {
    fn clone(&self) -> Self {
        Self {
            cc: Arc::clone(&self.cc),
        }
    }
}
