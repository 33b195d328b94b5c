use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    cookies::SessionCookies,
    error::ApiError,
    guard::{LOGIN_PATH, resolve_caller},
    identity::{AuthUser, IdentityState, Session},
};

/// Caller
///
/// The signed-in administrator behind a page request, together with the session
/// it was resolved from. The Route Guard attaches it to the request; page handlers
/// take it as an argument.
///
/// Rejection: a redirect to the login page. It only happens if a handler is
/// reached without the guard having run, and fails closed.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: AuthUser,
    pub session: Session,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| Redirect::temporary(LOGIN_PATH).into_response())
    }
}

/// ApiUser
///
/// Authenticated principal for the JSON API. API routes sit outside the Route
/// Guard, so this extractor resolves the session cookie itself with the same
/// fail-closed rules.
///
/// Rejection: 401 with a JSON error body.
#[derive(Debug, Clone)]
pub struct ApiUser(pub AuthUser);

impl<S> FromRequestParts<S> for ApiUser
where
    S: Send + Sync,
    IdentityState: FromRef<S>,
    SessionCookies: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = IdentityState::from_ref(state);
        let cookies = SessionCookies::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        resolve_caller(identity.as_ref(), &cookies, &jar)
            .await
            .caller
            .map(|caller| ApiUser(caller.user))
            .ok_or(ApiError::Unauthorized)
    }
}
