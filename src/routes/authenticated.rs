use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Pages that require a resolved session. The Route Guard runs before every one
/// of them and attaches the `Caller`; a handler reached without it redirects to
/// the login page.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /
        .route("/", get(handlers::root))
        // GET /dashboard
        .route("/dashboard", get(handlers::dashboard))
        // GET /dashboard/typography
        .route("/dashboard/typography", get(handlers::typography_page))
        // GET /dashboard/variables?category=colors
        .route("/dashboard/variables", get(handlers::variables_page))
        // GET /dashboard/users
        .route("/dashboard/users", get(handlers::users_page))
        // GET /session/watch
        // Event stream for an open page; emits a redirect once the session ends.
        .route("/session/watch", get(handlers::watch_session))
}
