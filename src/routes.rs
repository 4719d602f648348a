// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, campaigns, enrollments},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (campaigns, enrollments, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (wired services).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let campaign_routes = Router::new()
        .route("/", post(campaigns::create_campaign))
        .route(
            "/{id}",
            get(campaigns::get_campaign).put(campaigns::update_campaign),
        )
        .route("/{id}/roster", post(campaigns::attach_roster))
        .route("/{id}/enrollments", post(enrollments::enroll))
        .route("/{id}/session", post(enrollments::start_or_resume));

    let enrollment_routes = Router::new()
        .route("/{id}", get(enrollments::get_enrollment))
        .route("/{id}/progress", post(enrollments::record_progress))
        .route("/{id}/finish", post(enrollments::finish))
        .route("/{id}/results", get(enrollments::get_results));

    // Role authorization is enforced by the fronting gateway.
    let admin_routes = Router::new().route("/closure-sweep", post(admin::run_closure_sweep));

    Router::new()
        .nest("/api/campaigns", campaign_routes)
        .nest("/api/enrollments", enrollment_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
