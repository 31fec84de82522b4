//! Best-effort delivery of stats fragments.

use std::sync::Arc;
use std::time::Duration;

use siege_catalog::{Fragment, ShardCatalog};

/// Attempts per fragment before it is dropped.
pub const MAX_ATTEMPTS: u32 = 3;

const BACKOFF: Duration = Duration::from_millis(200);

/// Insert `fragment`, retrying up to [`MAX_ATTEMPTS`] times. Returns whether
/// it was stored.
pub async fn record_fragment<C: ShardCatalog + ?Sized>(catalog: &C, fragment: &Fragment) -> bool {
    for attempt in 1..=MAX_ATTEMPTS {
        match catalog.insert_fragment(fragment).await {
            Ok(()) => return true,
            Err(e) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    stream_id = %fragment.stream,
                    attempt,
                    error = %e,
                    "Fragment insert failed, retrying"
                );
                tokio::time::sleep(BACKOFF * attempt).await;
            }
            Err(e) => {
                tracing::error!(
                    critical = true,
                    stream_id = %fragment.stream,
                    error = %e,
                    "Dropping stats fragment"
                );
            }
        }
    }
    false
}

/// Deliver `fragment` in the background.
pub fn spawn_fragment<C: ShardCatalog + 'static>(catalog: Arc<C>, fragment: Fragment) {
    tokio::spawn(async move {
        record_fragment(catalog.as_ref(), &fragment).await;
    });
}
