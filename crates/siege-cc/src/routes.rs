//! Router configuration.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use siege_catalog::Catalog;

use crate::handlers::{assign, donors, engines, health, internal, managers, scvs, targets};
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// Create the command center router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /` - Liveness
/// - `POST /managers/auth`, `POST /donors`, `POST /donors/auth`
/// - `GET /targets`, `GET /targets/info/:id`
/// - `GET /scvs/status`
///
/// ## Managers
/// - `GET /users/verify`
/// - `POST /targets`, `PUT /targets/update/:id`, `PUT /targets/delete/:id`
/// - `GET /targets/streams/:id`
///
/// ## Admins
/// - `POST /managers`, `PUT /managers/weight/:email`
/// - `POST /engines/keys`, `GET /engines/keys`, `PUT /engines/keys/delete/:id`
///
/// ## Cores (engine key)
/// - `POST /core/assign`
///
/// ## SCVs (cluster secret)
/// - `POST /internal/catalog`
pub fn create_router<C, S>(state: CcState<C, S>) -> Router
where
    C: Catalog + 'static,
    S: ScvClient + 'static,
{
    let max_body_bytes = state.cc.config().max_body_bytes;
    let request_timeout = state.cc.config().request_timeout();

    Router::new()
        .route("/", get(health::health))
        // Accounts
        .route("/managers", post(managers::create::<C, S>))
        .route("/managers/auth", post(managers::login::<C, S>))
        .route("/managers/weight/:email", put(managers::set_weight::<C, S>))
        .route("/users/verify", get(managers::verify))
        .route("/donors", post(donors::create::<C, S>))
        .route("/donors/auth", post(donors::login::<C, S>))
        .route(
            "/engines/keys",
            post(engines::create::<C, S>).get(engines::list::<C, S>),
        )
        .route("/engines/keys/delete/:id", put(engines::delete::<C, S>))
        // Targets
        .route(
            "/targets",
            get(targets::list::<C, S>).post(targets::create::<C, S>),
        )
        .route("/targets/info/:id", get(targets::info::<C, S>))
        .route("/targets/update/:id", put(targets::update::<C, S>))
        .route("/targets/delete/:id", put(targets::delete::<C, S>))
        .route("/targets/streams/:id", get(targets::streams::<C, S>))
        // Cores and shards
        .route("/core/assign", post(assign::assign::<C, S>))
        .route("/scvs/status", get(scvs::status::<C, S>))
        .route("/internal/catalog", post(internal::catalog::<C, S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
