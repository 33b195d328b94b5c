use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokens_admin::{
    AppState, MockIdentityService, SessionCookies,
    config::{AppConfig, Env},
    cookies, create_router,
    identity::{AuthEvent, AuthUser, IdentityService, IdentityState},
    models::{CssVariable, TypographyForm, TypographyStyle, VariableForm},
    repository::{Repository, RepositoryState},
};
use tower::ServiceExt;
use uuid::Uuid;

// --- In-memory Repository ---

// Keeps rows in memory and records the filter of the last listing.
#[derive(Default)]
struct MemoryRepo {
    typography: Mutex<Vec<TypographyStyle>>,
    variables: Mutex<Vec<CssVariable>>,
    last_category: Mutex<Option<Option<String>>>,
}

#[async_trait]
impl Repository for MemoryRepo {
    async fn list_typography(&self) -> Result<Vec<TypographyStyle>, sqlx::Error> {
        Ok(self.typography.lock().unwrap().clone())
    }

    async fn update_typography(
        &self,
        id: Uuid,
        form: TypographyForm,
    ) -> Result<Option<TypographyStyle>, sqlx::Error> {
        let mut rows = self.typography.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        row.font_size = form.font_size;
        row.font_size_unit = form.font_size_unit;
        row.font_weight = form.font_weight;
        row.color = form.color;
        Ok(Some(row.clone()))
    }

    async fn list_variables(&self, category: Option<String>) -> Result<Vec<CssVariable>, sqlx::Error> {
        *self.last_category.lock().unwrap() = Some(category.clone());
        let mut rows: Vec<CssVariable> = self
            .variables
            .lock()
            .unwrap()
            .iter()
            .filter(|v| category.as_ref().is_none_or(|c| &v.category == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.category, &a.variable_name).cmp(&(&b.category, &b.variable_name)));
        Ok(rows)
    }

    async fn update_variable(&self, id: Uuid, form: VariableForm) -> Result<Option<CssVariable>, sqlx::Error> {
        let mut rows = self.variables.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        row.variable_value = form.variable_value;
        row.description = form.description;
        Ok(Some(row.clone()))
    }
}

// --- Unreachable Repository ---

// Every call fails the way a dropped database connection does.
struct FailingRepo;

#[async_trait]
impl Repository for FailingRepo {
    async fn list_typography(&self) -> Result<Vec<TypographyStyle>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
    async fn update_typography(
        &self,
        _id: Uuid,
        _form: TypographyForm,
    ) -> Result<Option<TypographyStyle>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
    async fn list_variables(&self, _category: Option<String>) -> Result<Vec<CssVariable>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
    async fn update_variable(&self, _id: Uuid, _form: VariableForm) -> Result<Option<CssVariable>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
}

// --- Helpers ---

struct TestApp {
    router: Router,
    identity: Arc<MockIdentityService>,
    repo: Arc<MemoryRepo>,
    admin: AuthUser,
    cookie: String,
}

fn test_app_with(config: AppConfig) -> TestApp {
    let identity = Arc::new(MockIdentityService::new());
    let admin = identity.add_admin("admin@example.com", "password123");
    let session = identity.issue_session(&admin);

    let repo = Arc::new(MemoryRepo::default());
    let cookies = SessionCookies::for_config(&config);
    let cookie = format!("{}={}", cookies.name(), cookies::encode(&session));
    let state = AppState::new(
        identity.clone() as IdentityState,
        repo.clone() as RepositoryState,
        config,
    );

    TestApp {
        router: create_router(state),
        identity,
        repo,
        admin,
        cookie,
    }
}

fn test_app() -> TestApp {
    test_app_with(AppConfig::default())
}

fn variable(name: &str, category: &str) -> CssVariable {
    CssVariable {
        id: Uuid::new_v4(),
        variable_name: name.to_string(),
        variable_value: "1rem".to_string(),
        category: category.to_string(),
        ..CssVariable::default()
    }
}

fn typography_row(id: Uuid) -> TypographyStyle {
    TypographyStyle {
        id,
        class_name: "heading-1".to_string(),
        font_size: 32.0,
        font_size_unit: "px".to_string(),
        font_weight: 700,
        color: "#111111".to_string(),
        line_height: 1.2,
        line_height_unit: "unitless".to_string(),
        letter_spacing: 0.0,
        letter_spacing_unit: "px".to_string(),
        text_transform: "none".to_string(),
        font_style: "normal".to_string(),
        border_radius: 0.0,
        border_radius_unit: "px".to_string(),
        ..TypographyStyle::default()
    }
}

fn typography_body() -> Value {
    json!({
        "font_size": 2.5,
        "font_size_unit": "rem",
        "font_weight": 600,
        "color": "#222222",
        "line_height": 1.4,
        "line_height_unit": "unitless",
        "letter_spacing": 0.5,
        "letter_spacing_unit": "px",
        "text_transform": "uppercase",
        "font_style": "italic",
        "border_radius": 4.0,
        "border_radius_unit": "%"
    })
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, &self.cookie);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }
}

async fn directory_size(identity: &MockIdentityService) -> usize {
    identity.list_users().await.unwrap().len()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// --- Users ---

#[tokio::test]
async fn test_list_users_returns_directory() {
    let app = test_app();

    let response = app.call(Method::GET, "/api/users", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 1);
    assert_eq!(body["users"][0]["email"], "admin@example.com");
}

#[tokio::test]
async fn test_create_user_rejects_malformed_email() {
    let app = test_app();

    let response = app
        .call(
            Method::POST,
            "/api/users",
            Some(json!({ "email": "not-an-email", "password": "longenough" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid email format");
}

#[tokio::test]
async fn test_create_user_rejects_short_password() {
    let app = test_app();

    let response = app
        .call(
            Method::POST,
            "/api/users",
            Some(json!({ "email": "new@example.com", "password": "short" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_user_then_duplicate() {
    let app = test_app();
    let payload = json!({ "email": "new@example.com", "password": "longenough" });

    let created = app.call(Method::POST, "/api/users", Some(payload.clone())).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "new@example.com");
    // email_confirm defaults to true
    assert!(!body["user"]["email_confirmed_at"].is_null());

    let duplicate = app.call(Method::POST, "/api/users", Some(payload)).await;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(duplicate).await["error"],
        "a user with this email already exists"
    );
}

#[tokio::test]
async fn test_delete_self_is_forbidden() {
    let app = test_app();

    let response = app
        .call(Method::DELETE, &format!("/api/users/{}", app.admin.id), None)
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(directory_size(&app.identity).await, 1);
}

#[tokio::test]
async fn test_delete_unknown_user_is_404() {
    let app = test_app();

    let response = app
        .call(Method::DELETE, &format!("/api/users/{}", Uuid::new_v4()), None)
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_other_admin_signs_them_out() {
    let app = test_app();
    let other = app.identity.add_admin("other@example.com", "password123");
    let mut events = app.identity.subscribe();

    let response = app
        .call(Method::DELETE, &format!("/api/users/{}", other.id), None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);
    let event = events.try_recv().unwrap();
    assert_eq!(event, AuthEvent::UserDeleted { user_id: other.id });
    assert_eq!(directory_size(&app.identity).await, 1);
}

// --- Typography ---

#[tokio::test]
async fn test_update_typography_persists_form() {
    let app = test_app();
    let id = Uuid::new_v4();
    app.repo.typography.lock().unwrap().push(typography_row(id));

    let response = app
        .call(Method::PUT, &format!("/api/typography/{id}"), Some(typography_body()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["font_size"], 2.5);
    assert_eq!(body["data"]["font_size_unit"], "rem");
    assert_eq!(body["data"]["class_name"], "heading-1");
}

#[tokio::test]
async fn test_update_typography_rejects_unknown_unit() {
    let app = test_app();
    let id = Uuid::new_v4();
    app.repo.typography.lock().unwrap().push(typography_row(id));
    let mut body = typography_body();
    body["font_size_unit"] = json!("vw");

    let response = app
        .call(Method::PUT, &format!("/api/typography/{id}"), Some(body))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.repo.typography.lock().unwrap()[0].font_size, 32.0);
}

#[tokio::test]
async fn test_update_typography_requires_color() {
    let app = test_app();
    let mut body = typography_body();
    body["color"] = json!("  ");

    let response = app
        .call(Method::PUT, &format!("/api/typography/{}", Uuid::new_v4()), Some(body))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_missing_typography_is_404() {
    let app = test_app();

    let response = app
        .call(
            Method::PUT,
            &format!("/api/typography/{}", Uuid::new_v4()),
            Some(typography_body()),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- Variables ---

#[tokio::test]
async fn test_update_variable_normalizes_empty_description() {
    let app = test_app();
    let id = Uuid::new_v4();
    app.repo.variables.lock().unwrap().push(CssVariable {
        id,
        variable_name: "primary-color".to_string(),
        variable_value: "#000000".to_string(),
        category: "colors".to_string(),
        description: Some("old".to_string()),
        ..CssVariable::default()
    });

    let response = app
        .call(
            Method::PUT,
            &format!("/api/variables/{id}"),
            Some(json!({ "variable_value": "#FF5733", "description": "" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["variable_value"], "#FF5733");
    assert!(body["data"]["description"].is_null());
}

#[tokio::test]
async fn test_update_variable_requires_value() {
    let app = test_app();

    let response = app
        .call(
            Method::PUT,
            &format!("/api/variables/{}", Uuid::new_v4()),
            Some(json!({ "variable_value": "" })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_variables_page_filters_by_category() {
    let app = test_app();

    let response = app
        .call(Method::GET, "/dashboard/variables?category=colors", None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        *app.repo.last_category.lock().unwrap(),
        Some(Some("colors".to_string()))
    );
}

#[tokio::test]
async fn test_variables_page_rejects_unknown_category() {
    let app = test_app();

    let response = app
        .call(Method::GET, "/dashboard/variables?category=shadows", None)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.repo.last_category.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_variables_page_orders_and_counts_by_category() {
    let app = test_app();
    app.repo.variables.lock().unwrap().extend([
        variable("spacing-lg", "sizes"),
        variable("primary", "colors"),
        variable("accent", "colors"),
        variable("fade-in", "animations"),
    ]);

    let response = app.call(Method::GET, "/dashboard/variables", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 4);
    assert_eq!(body["stats"], json!({ "animations": 1, "colors": 2, "sizes": 1 }));
    let names: Vec<&str> = body["variables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["variable_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["fade-in", "accent", "primary", "spacing-lg"]);
}

// --- Database failures ---

fn failing_app() -> (Router, String) {
    let identity = Arc::new(MockIdentityService::new());
    let admin = identity.add_admin("admin@example.com", "password123");
    let session = identity.issue_session(&admin);
    let config = AppConfig::default();
    let cookies = SessionCookies::for_config(&config);
    let cookie = format!("{}={}", cookies.name(), cookies::encode(&session));
    let state = AppState::new(
        identity as IdentityState,
        Arc::new(FailingRepo) as RepositoryState,
        config,
    );
    (create_router(state), cookie)
}

async fn call_failing(method: Method, uri: &str, body: Option<Value>) -> Response {
    let (router, cookie) = failing_app();
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    router.oneshot(request.body(body).unwrap()).await.unwrap()
}

#[tokio::test]
async fn test_update_variable_database_failure_is_500_not_404() {
    let response = call_failing(
        Method::PUT,
        &format!("/api/variables/{}", Uuid::new_v4()),
        Some(json!({ "variable_value": "#fff" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "internal server error");
}

#[tokio::test]
async fn test_update_typography_database_failure_is_500() {
    let response = call_failing(
        Method::PUT,
        &format!("/api/typography/{}", Uuid::new_v4()),
        Some(typography_body()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_pages_report_database_failure_instead_of_empty_list() {
    let typography = call_failing(Method::GET, "/dashboard/typography", None).await;
    assert_eq!(typography.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let variables = call_failing(Method::GET, "/dashboard/variables", None).await;
    assert_eq!(variables.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// --- Test user seed ---

#[tokio::test]
async fn test_create_test_user_is_idempotent_locally() {
    let app = test_app();

    let first = app.call(Method::POST, "/api/auth/create-test-user", None).await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await;
    assert_eq!(body["email"], "admin@test.com");
    assert!(!body["user_id"].is_null());

    let second = app.call(Method::POST, "/api/auth/create-test-user", None).await;
    assert_eq!(second.status(), StatusCode::OK);
    let body = json_body(second).await;
    assert_eq!(body["success"], true);
    assert!(body["user_id"].is_null());
}

#[tokio::test]
async fn test_create_test_user_is_hidden_in_production() {
    let app = test_app_with(AppConfig {
        env: Env::Production,
        service_role_key: Some("service-role".to_string()),
        ..AppConfig::default()
    });

    let response = app.call(Method::POST, "/api/auth/create-test-user", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(directory_size(&app.identity).await, 1);
}
