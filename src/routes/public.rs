use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints usable without a session. `/login` is still inspected by the Route
/// Guard, which bounces callers who are already signed in to the dashboard.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for the load balancer. Not guarded.
        .route("/health", get(|| async { "ok" }))
        // GET /login?error=...
        // POST /login (form: email, password)
        .route("/login", get(handlers::login_page).post(handlers::login))
        // POST /logout
        // Needs a session; an anonymous caller is redirected to /login by the guard.
        .route("/logout", post(handlers::logout))
}
