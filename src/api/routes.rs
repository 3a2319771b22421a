use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::auth::{auth_middleware, AuthService};

use super::handlers::{
    answer_question, export_report, get_overview, health_check, track_event, AppState,
};

pub fn create_api_router(
    state: Arc<AppState>,
    auth_service: Arc<AuthService>,
    cors_origins: &[String],
) -> Router {
    let protected_routes = Router::new()
        .route("/analytics/{project_id}/overview", get(get_overview))
        .route("/analytics/{project_id}/export", get(export_report))
        .route("/nlq", post(answer_question))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }));

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/track", post(track_event))
        .merge(protected_routes)
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
