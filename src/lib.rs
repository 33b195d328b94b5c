use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---
pub mod auth;
pub mod config;
pub mod cookies;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod repository;
pub mod watcher;
pub mod routes;

use routes::{api, authenticated, public};

// --- Public Re-exports ---
pub use config::AppConfig;
pub use cookies::SessionCookies;
pub use identity::{IdentityState, MockIdentityService, SupabaseAuthClient};
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for the JSON API, served at `/api-docs/openapi.json`.
/// Pages are not part of it.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_users, handlers::create_user, handlers::delete_user,
        handlers::update_typography, handlers::update_variable, handlers::create_test_user
    ),
    components(
        schemas(
            models::TypographyStyle, models::TypographyForm, models::CssVariable,
            models::VariableForm, models::AdminUser, models::CreateUserRequest,
            models::UsersListResponse, models::CreateUserResponse, models::SuccessResponse,
            models::TestUserResponse,
        )
    ),
    tags(
        (name = "tokens-admin", description = "Design tokens admin API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, immutable services handed to every request.
#[derive(Clone)]
pub struct AppState {
    /// Identity service: session lookups, sign-in/out, auth events, admin users.
    pub identity: IdentityState,
    /// Design token persistence.
    pub repo: RepositoryState,
    /// Session cookie codec for this project.
    pub cookies: SessionCookies,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(identity: IdentityState, repo: RepositoryState, config: AppConfig) -> Self {
        Self {
            identity,
            repo,
            cookies: SessionCookies::for_config(&config),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionCookies {
    fn from_ref(app_state: &AppState) -> SessionCookies {
        app_state.cookies.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles pages, API and docs, puts the Route Guard in front of all of them
/// (its matcher skips what it should not inspect) and wraps everything in the
/// observability layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest("/api", api::api_routes())
        // `layer` rather than `route_layer`: unknown paths are guarded too.
        .layer(middleware::from_fn_with_state(state.clone(), guard::route_guard))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Per-request span carrying the `x-request-id`, so every log line of a request
/// (guard decisions included) can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
