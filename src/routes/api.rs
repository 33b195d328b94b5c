use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// API Router Module
///
/// JSON endpoints nested under `/api`. Every handler except the local test-user
/// seed takes the `ApiUser` extractor, which answers 401 instead of redirecting.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /api/users
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        // DELETE /api/users/{id}
        // Self-deletion is refused with 403.
        .route("/users/{id}", delete(handlers::delete_user))
        // PUT /api/typography/{id}
        .route("/typography/{id}", put(handlers::update_typography))
        // PUT /api/variables/{id}
        .route("/variables/{id}", put(handlers::update_variable))
        // POST /api/auth/create-test-user
        // Local environment only.
        .route("/auth/create-test-user", post(handlers::create_test_user))
}
