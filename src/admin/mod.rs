//! Admin console: session-gated JSON API over the catalog, orders and analytics

pub mod analytics;
pub mod handlers;
pub mod session;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;

pub use session::{AdminSession, SessionStore, SESSION_COOKIE};

/// Routes under `/admin`; every handler except login extracts an [`AdminSession`]
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/login", post(handlers::login))
        .route("/admin/logout", post(handlers::logout))
        .route(
            "/admin/categories",
            get(handlers::list_categories).post(handlers::create_category),
        )
        .route("/admin/categories/{id}", delete(handlers::delete_category))
        .route(
            "/admin/services",
            get(handlers::list_services).post(handlers::create_service),
        )
        .route("/admin/services/{id}", delete(handlers::delete_service))
        .route("/admin/orders", get(handlers::list_orders))
        .route("/admin/orders/{id}", get(handlers::get_order))
        .route("/admin/orders/{id}/messages", post(handlers::post_message))
        .route("/admin/orders/{id}/status", post(handlers::set_status))
        .route(
            "/admin/orders/{id}/audio/{kind}",
            post(handlers::upload_audio).layer(handlers::upload_limit()),
        )
        .route("/admin/analytics", get(handlers::get_analytics))
}
