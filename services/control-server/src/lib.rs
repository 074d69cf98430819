pub mod error;
pub mod http;
pub mod schedule_spec;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Builds the full HTTP surface over an already-bootstrapped [`AppState`].
/// Kept separate from `main` so integration tests can build a router
/// against an in-memory controller fleet.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::contract::contract))
        .route("/controllers", get(http::controllers::list_controllers))
        .route("/get_state", get(http::controller_state::get_fleet_state))
        .route("/get_state/:cname", get(http::controller_state::get_one_state))
        .route("/set_state", post(http::controller_state::set_fleet_state))
        .route("/set_state/:cname", post(http::controller_state::set_one_state))
        .route("/set_state_deferred", post(http::deferred::set_fleet_deferred))
        .route("/set_state_deferred/:cname", post(http::deferred::set_one_deferred))
        .route("/list_deferred", get(http::deferred::list_fleet_deferred))
        .route("/list_deferred/:cname", get(http::deferred::list_one_deferred))
        .route("/cancel_deferred", get(http::deferred::cancel_deferred))
        .route("/downstream", post(http::downstream::downstream_fleet))
        .route("/downstream/:cname", post(http::downstream::downstream_one))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
