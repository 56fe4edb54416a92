// src/routes.rs
use axum::routing::{get, post};
use axum::Router;
use http::header::{InvalidHeaderValue, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState, ROLE_HEADER};

/// CORS for the browser front end. `None` allows any origin.
pub fn cors_layer(allow_origin: Option<&str>) -> Result<CorsLayer, InvalidHeaderValue> {
    let origin = match allow_origin {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin)?),
        None => AllowOrigin::any(),
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(ROLE_HEADER)]))
}

pub fn create_routes(state: AppState, cors: CorsLayer) -> Router {
    let api = Router::new()
        .route("/polls", get(handlers::list_polls))
        .route("/polls/{poll_id}/results", get(handlers::poll_results))
        .route("/polls/{poll_id}/vote", post(handlers::cast_vote))
        .route("/admin/polls/{poll_id}/history", get(handlers::history))
        .route("/admin/polls/{poll_id}/release", post(handlers::release_identity));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
