use crate::{
    AppState,
    auth::{ApiUser, Caller},
    config::Env,
    error::ApiError,
    guard::{LANDING_PATH, LOGIN_PATH},
    identity::IdentityError,
    models::{
        CreateUserRequest, CreateUserResponse, CssVariable, DashboardSection, DashboardView,
        DataResponse, LoginForm, LoginView, SuccessResponse, TestUserResponse, TypographyForm,
        TypographyStyle, UsersListResponse, VARIABLE_CATEGORIES, VariableForm, VariablesView,
    },
    watcher::{ChannelNavigator, SessionWatcher},
};
use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{Stream, stream};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_USER_EMAIL: &str = "admin@test.com";
const TEST_USER_PASSWORD: &str = "TestAdmin123!";

// --- Query Structs ---

/// LoginQuery
///
/// `?error=` set by a failed POST /login.
#[derive(Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

/// VariableFilter
///
/// Optional category filter for the variables page.
#[derive(Deserialize)]
pub struct VariableFilter {
    /// One of colors, sizes, animations, fonts, buttons.
    pub category: Option<String>,
}

// --- Pages ---

/// login_page
///
/// [Public Page] The only page reachable without a session. A signed-in caller
/// never gets here: the Route Guard sends them to the dashboard.
pub async fn login_page(Query(query): Query<LoginQuery>) -> Json<LoginView> {
    Json(LoginView {
        page: "login".to_string(),
        error: query.error,
    })
}

/// login
///
/// [Public Page] Password sign-in. On success the session is written into the
/// auth cookies and the browser lands on the dashboard.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state
        .identity
        .sign_in_with_password(form.email.trim(), &form.password)
        .await
    {
        Ok(session) => {
            let jar = state.cookies.write(jar, &session);
            (jar, Redirect::to(LANDING_PATH)).into_response()
        }
        Err(IdentityError::InvalidCredentials) => {
            tracing::info!("rejected sign-in attempt");
            Redirect::to(&format!("{LOGIN_PATH}?error=invalid_credentials")).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "sign-in failed");
            Redirect::to(&format!("{LOGIN_PATH}?error=unavailable")).into_response()
        }
    }
}

/// logout
///
/// [Protected Page] Revokes the session (best effort) and clears the cookies.
/// The principal is the one the guard resolved, never the user echoed in the cookie.
pub async fn logout(State(state): State<AppState>, caller: Caller, jar: CookieJar) -> Response {
    if let Err(e) = state.identity.sign_out(&caller.user, &caller.session).await {
        tracing::warn!(user_id = %caller.user.id, error = %e, "sign-out request failed, clearing cookies anyway");
    }
    let jar = state.cookies.clear(jar);
    (jar, Redirect::to(LOGIN_PATH)).into_response()
}

pub async fn root() -> Redirect {
    Redirect::temporary(LANDING_PATH)
}

/// dashboard
///
/// [Protected Page] Who is signed in and which sections exist.
pub async fn dashboard(caller: Caller) -> Json<DashboardView> {
    let sections = [
        ("Typography", "/dashboard/typography"),
        ("Variables", "/dashboard/variables"),
        ("Users", "/dashboard/users"),
    ]
    .into_iter()
    .map(|(name, path)| DashboardSection {
        name: name.to_string(),
        path: path.to_string(),
    })
    .collect();

    Json(DashboardView {
        user_id: caller.user.id,
        email: caller.user.email,
        sections,
    })
}

/// typography_page
///
/// [Protected Page] All typography styles, ordered by class name.
pub async fn typography_page(
    _caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<Vec<TypographyStyle>>, ApiError> {
    Ok(Json(state.repo.list_typography().await?))
}

/// variables_page
///
/// [Protected Page] CSS variables, optionally narrowed to one category, with a
/// per-category count of what is listed.
pub async fn variables_page(
    _caller: Caller,
    State(state): State<AppState>,
    Query(filter): Query<VariableFilter>,
) -> Result<Json<VariablesView>, ApiError> {
    let category = filter.category.filter(|c| !c.is_empty());
    if let Some(category) = &category {
        if !VARIABLE_CATEGORIES.contains(&category.as_str()) {
            return Err(ApiError::BadRequest(format!("unknown category {category}")));
        }
    }
    let variables = state.repo.list_variables(category).await?;
    Ok(Json(VariablesView::new(variables)))
}

/// users_page
///
/// [Protected Page] Administrator accounts, straight from the identity admin API.
pub async fn users_page(
    _caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<UsersListResponse>, ApiError> {
    let users = state.identity.list_users().await?;
    Ok(Json(UsersListResponse {
        success: true,
        total: users.len(),
        users,
    }))
}

/// watch_session
///
/// [Protected Page] Server-sent events for an open page. A Session Watcher is
/// mounted for the caller's session; when it invalidates, a single
/// `event: redirect` with `data: /login` is sent and the stream ends. Closing
/// the page drops the stream, which unmounts the watcher.
pub async fn watch_session(
    State(state): State<AppState>,
    caller: Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = SessionWatcher::new(
        state.identity.clone(),
        Arc::new(ChannelNavigator::new(tx)),
        state.config.watch_policy(),
    );
    let handle = watcher.mount(caller.user, caller.session);

    // The stream owns the handle; the watch lives exactly as long as the connection.
    let redirects = stream::unfold((rx, handle), |(mut rx, handle)| async move {
        let location = rx.recv().await?;
        let event = Event::default().event("redirect").data(location);
        Some((Ok(event), (rx, handle)))
    });

    Sse::new(redirects).keep_alive(KeepAlive::default())
}

// --- JSON API ---

/// list_users
///
/// [API] Lists administrator accounts.
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "Administrators", body = UsersListResponse),
        (status = 401, description = "No session")
    )
)]
pub async fn list_users(
    _user: ApiUser,
    State(state): State<AppState>,
) -> Result<Json<UsersListResponse>, ApiError> {
    let users = state.identity.list_users().await?;
    Ok(Json(UsersListResponse {
        success: true,
        total: users.len(),
        users,
    }))
}

/// create_user
///
/// [API] Creates an administrator. Email format and password length are checked
/// here before the identity service is called.
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = CreateUserResponse),
        (status = 400, description = "Invalid input or duplicate email"),
        (status = 401, description = "No session")
    )
)]
pub async fn create_user(
    ApiUser(admin): ApiUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    payload.validate().map_err(ApiError::BadRequest)?;

    let user = state.identity.create_user(&payload).await?;
    tracing::info!(created_by = %admin.id, user_id = %user.id, "administrator created");

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse { success: true, user }),
    ))
}

/// delete_user
///
/// [API] Deletes an administrator. An admin cannot delete their own account.
/// Any open page of the deleted account is signed out by its Session Watcher.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deleted", body = SuccessResponse),
        (status = 403, description = "Self-deletion"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    ApiUser(admin): ApiUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if id == admin.id {
        return Err(ApiError::Forbidden("you cannot delete your own account".to_string()));
    }

    state.identity.delete_user(id).await?;
    tracing::info!(deleted_by = %admin.id, user_id = %id, "administrator deleted");

    Ok(Json(SuccessResponse { success: true }))
}

/// update_typography
///
/// [API] Replaces a typography style's editable fields.
#[utoipa::path(
    put,
    path = "/api/typography/{id}",
    params(("id" = Uuid, Path, description = "Typography style ID")),
    request_body = TypographyForm,
    responses(
        (status = 200, description = "Updated style, wrapped in `data`", body = TypographyStyle),
        (status = 400, description = "Invalid form"),
        (status = 404, description = "Not Found"),
        (status = 500, description = "Database failure")
    )
)]
pub async fn update_typography(
    _user: ApiUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<TypographyForm>,
) -> Result<Json<DataResponse<TypographyStyle>>, ApiError> {
    form.validate().map_err(ApiError::BadRequest)?;

    match state.repo.update_typography(id, form).await? {
        Some(data) => Ok(Json(DataResponse { data })),
        None => Err(ApiError::NotFound("typography style not found".to_string())),
    }
}

/// update_variable
///
/// [API] Sets a CSS variable's value and description.
#[utoipa::path(
    put,
    path = "/api/variables/{id}",
    params(("id" = Uuid, Path, description = "CSS variable ID")),
    request_body = VariableForm,
    responses(
        (status = 200, description = "Updated variable, wrapped in `data`", body = CssVariable),
        (status = 400, description = "Missing value"),
        (status = 404, description = "Not Found"),
        (status = 500, description = "Database failure")
    )
)]
pub async fn update_variable(
    _user: ApiUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<VariableForm>,
) -> Result<Json<DataResponse<CssVariable>>, ApiError> {
    let form = form.normalized().map_err(ApiError::BadRequest)?;

    match state.repo.update_variable(id, form).await? {
        Some(data) => Ok(Json(DataResponse { data })),
        None => Err(ApiError::NotFound("css variable not found".to_string())),
    }
}

/// create_test_user
///
/// [API, local only] Seeds the `admin@test.com` account for development.
/// Calling it again is harmless. Outside the local environment it does not exist.
#[utoipa::path(
    post,
    path = "/api/auth/create-test-user",
    responses(
        (status = 200, description = "Test user present", body = TestUserResponse),
        (status = 404, description = "Not available outside local")
    )
)]
pub async fn create_test_user(State(state): State<AppState>) -> Result<Json<TestUserResponse>, ApiError> {
    if state.config.env != Env::Local {
        return Err(ApiError::NotFound("not found".to_string()));
    }

    let request = CreateUserRequest {
        email: TEST_USER_EMAIL.to_string(),
        password: TEST_USER_PASSWORD.to_string(),
        email_confirm: true,
    };
    let (message, user_id) = match state.identity.create_user(&request).await {
        Ok(user) => ("test user created", Some(user.id)),
        Err(IdentityError::AlreadyRegistered) => ("test user already exists", None),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(TestUserResponse {
        success: true,
        message: message.to_string(),
        email: TEST_USER_EMAIL.to_string(),
        user_id,
    }))
}
