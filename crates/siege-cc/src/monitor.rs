//! Background upkeep of the shard directory: the wholesale refresh from the
//! catalog and the SCV liveness ping.

use axum::http::Method;
use futures::future::join_all;
use tokio::time::MissedTickBehavior;

use siege_catalog::Catalog;

use crate::directory::ScvStatus;
use crate::error::Result;
use crate::scv_client::ScvClient;
use crate::service::CommandCenter;

impl<C: Catalog, S: ScvClient> CommandCenter<C, S> {
    /// Rebuild the shard directory from the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub async fn refresh_directory(&self) -> Result<usize> {
        self.directory().refresh(self.catalog()).await
    }

    /// Ping every known SCV once, concurrently. Returns how many answered.
    pub async fn ping_scvs(&self) -> usize {
        let scvs = self.directory().scvs();
        let replies = join_all(
            scvs.iter()
                .map(|scv| self.fetch(scv, Method::GET, "/", None)),
        )
        .await;
        replies.iter().filter(|r| !r.is_failure()).count()
    }

    /// Reachability of every known SCV.
    #[must_use]
    pub fn scv_status(&self) -> std::collections::BTreeMap<String, ScvStatus> {
        self.directory().status()
    }

    /// Run the directory refresh and the SCV ping forever.
    pub async fn run_monitors(&self) {
        tokio::join!(self.run_directory_refresh(), self.run_scv_ping());
    }

    async fn run_directory_refresh(&self) {
        let mut ticker = tokio::time::interval(self.config().directory_refresh());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.refresh_directory().await {
                Ok(targets) => tracing::debug!(targets, "Directory refresh complete"),
                Err(e) => tracing::error!(critical = true, error = %e, "Directory refresh failed"),
            }
        }
    }

    async fn run_scv_ping(&self) {
        let mut ticker = tokio::time::interval(self.config().scv_ping());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let online = self.ping_scvs().await;
            tracing::trace!(online, "SCV ping complete");
        }
    }
}
