//! Route Guard.
//!
//! Runs before every page request: classifies the path, resolves the caller's
//! session through the identity service and either lets the request through or
//! redirects it. Lookups are never cached; each request stands on its own.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    AppState,
    auth::Caller,
    cookies::SessionCookies,
    identity::{IdentityService, SessionChange},
};

/// The only public page.
pub const LOGIN_PATH: &str = "/login";
/// Where signed-in callers land.
pub const LANDING_PATH: &str = "/dashboard";

// Prefixes served without page authentication (JSON API, docs).
const UNGUARDED_PREFIXES: [&str; 3] = ["/api", "/swagger-ui", "/api-docs"];

/// RouteClass
///
/// Redirect policy bucket for a request path. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Login,
    Protected,
}

impl RouteClass {
    pub fn classify(path: &str) -> Self {
        if path == LOGIN_PATH || path.starts_with("/login/") {
            RouteClass::Login
        } else {
            RouteClass::Protected
        }
    }
}

/// is_guarded
///
/// The guard's path matcher. API routes authenticate themselves, the health check
/// and the API docs are open, and anything that looks like a static asset (a dot in
/// the last segment) is served as is.
pub fn is_guarded(path: &str) -> bool {
    if path == "/health" {
        return false;
    }
    let unguarded_prefix = UNGUARDED_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')));
    if unguarded_prefix {
        return false;
    }
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    !last_segment.contains('.')
}

/// The request may reach its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proceed;

/// The request must be redirected to `location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRedirect {
    pub location: &'static str,
}

/// decide
///
/// The guard's decision table.
///
/// | class     | resolved | outcome              |
/// |-----------|----------|----------------------|
/// | protected | no       | redirect to login    |
/// | protected | yes      | proceed              |
/// | login     | yes      | redirect to landing  |
/// | login     | no       | proceed              |
pub fn decide(class: RouteClass, resolved: bool) -> Result<Proceed, GuardRedirect> {
    match (class, resolved) {
        (RouteClass::Protected, false) => Err(GuardRedirect { location: LOGIN_PATH }),
        (RouteClass::Login, true) => Err(GuardRedirect { location: LANDING_PATH }),
        (RouteClass::Protected, true) | (RouteClass::Login, false) => Ok(Proceed),
    }
}

/// What the response must do to the browser's session cookie.
#[derive(Debug, Clone, PartialEq)]
pub enum CookieUpdate {
    Keep,
    Write(crate::identity::Session),
    Clear,
}

/// Resolution
///
/// Outcome of resolving one request's credentials.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub caller: Option<Caller>,
    pub cookies: CookieUpdate,
}

impl Resolution {
    fn anonymous() -> Self {
        Self {
            caller: None,
            cookies: CookieUpdate::Keep,
        }
    }

    /// Applies the cookie update to `jar`.
    pub fn apply(&self, cookies: &SessionCookies, jar: CookieJar) -> CookieJar {
        match &self.cookies {
            CookieUpdate::Keep => jar,
            CookieUpdate::Write(session) => cookies.write(jar, session),
            CookieUpdate::Clear => cookies.clear(jar),
        }
    }
}

/// resolve_caller
///
/// Resolves the session carried by `jar`. Fails closed: an identity service
/// error yields an anonymous caller and leaves the cookies alone, since the
/// session itself may well be fine.
pub async fn resolve_caller(
    identity: &dyn IdentityService,
    cookies: &SessionCookies,
    jar: &CookieJar,
) -> Resolution {
    let Some(presented) = cookies.read(jar) else {
        return Resolution::anonymous();
    };

    match identity.get_user(&presented).await {
        Ok(lookup) => {
            let current = lookup.current_session(&presented);
            let update = match &lookup.session {
                SessionChange::Unchanged => CookieUpdate::Keep,
                SessionChange::Refreshed(session) => CookieUpdate::Write(session.clone()),
                SessionChange::Revoked => CookieUpdate::Clear,
            };
            let caller = match (lookup.user, current) {
                (Some(user), Some(session)) => Some(Caller { user, session }),
                _ => None,
            };
            Resolution {
                caller,
                cookies: update,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "identity lookup failed, treating caller as signed out");
            Resolution::anonymous()
        }
    }
}

/// route_guard
///
/// Middleware enforcing the decision table on every guarded path. On
/// pass-through the resolved `Caller` is attached to the request and any
/// refreshed session is written back on the response.
pub async fn route_guard(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    if !is_guarded(&path) {
        return next.run(request).await;
    }

    // Classified before any identity call or data access.
    let class = RouteClass::classify(&path);
    let resolution = resolve_caller(state.identity.as_ref(), &state.cookies, &jar).await;
    let jar = resolution.apply(&state.cookies, jar);

    match decide(class, resolution.caller.is_some()) {
        Ok(Proceed) => {
            if let Some(caller) = resolution.caller {
                request.extensions_mut().insert(caller);
            }
            let response = next.run(request).await;
            // A handler that wrote the session cookie itself (login, logout) has the last word.
            if sets_cookie(&response, state.cookies.name()) {
                return response;
            }
            (jar, response).into_response()
        }
        Err(GuardRedirect { location }) => {
            tracing::debug!(%path, location, "route guard redirect");
            (jar, Redirect::temporary(location)).into_response()
        }
    }
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with(name))
}
