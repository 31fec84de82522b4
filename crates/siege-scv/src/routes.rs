//! Router configuration.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use siege_catalog::ShardCatalog;

use crate::handlers::{active, health, protocol, streams};
use crate::state::ScvState;

/// Create the SCV router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /` - Liveness
/// - `GET /active_streams` - Active leases per target
///
/// ## Command center (SCV password)
/// - `POST /streams/activate` - Lease a stream of a target
///
/// ## Managers
/// - `POST /streams` - Create a stream
/// - `PUT /streams/start/:id`, `PUT /streams/stop/:id`, `PUT /streams/delete/:id`
/// - `GET /streams/info/:id`, `GET /streams/sync/:id`
/// - `GET /targets/streams/:target_id`
/// - `PUT /streams/upload/:id/:filename`, `GET /streams/download/:id/:filename`
/// - `PUT /streams/replace/:id`
///
/// ## Cores (bearer token)
/// - `GET /core/start`, `PUT /core/frame`, `PUT /core/checkpoint`,
///   `PUT /core/stop`, `POST /core/heartbeat`
pub fn create_router<C: ShardCatalog + 'static>(state: ScvState<C>) -> Router {
    let max_body_bytes = state.service.config().max_body_bytes;
    let request_timeout = state.service.config().request_timeout();

    Router::new()
        .route("/", get(health::health))
        .route("/active_streams", get(active::list::<C>))
        .route("/streams/activate", post(active::activate::<C>))
        // Streams
        .route("/streams", post(streams::create::<C>))
        .route("/streams/start/:id", put(streams::start::<C>))
        .route("/streams/stop/:id", put(streams::stop::<C>))
        .route("/streams/delete/:id", put(streams::delete::<C>))
        .route("/streams/info/:id", get(streams::info::<C>))
        .route("/streams/sync/:id", get(streams::sync::<C>))
        .route("/streams/replace/:id", put(streams::replace::<C>))
        .route("/streams/upload/:id/:filename", put(streams::upload::<C>))
        .route("/streams/download/:id/:filename", get(streams::download::<C>))
        .route("/targets/streams/:target_id", get(streams::for_target::<C>))
        // Core protocol
        .route("/core/start", get(protocol::start::<C>))
        .route("/core/frame", put(protocol::frame::<C>))
        .route("/core/checkpoint", put(protocol::checkpoint::<C>))
        .route("/core/stop", put(protocol::stop::<C>))
        .route("/core/heartbeat", post(protocol::heartbeat::<C>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
