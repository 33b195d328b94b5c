use async_trait::async_trait;
use reqwest::{StatusCode, header, redirect::Policy};
use std::{sync::Arc, time::Duration};
use tokens_admin::{
    AppConfig, AppState, MockIdentityService, SessionCookies, cookies, create_router,
    identity::{AuthUser, IdentityService, IdentityState, Session},
    models::{CssVariable, TypographyForm, TypographyStyle, VariableForm},
    repository::{Repository, RepositoryState},
};
use tokio::{net::TcpListener, time::timeout};
use uuid::Uuid;

// --- Empty Repository ---

struct EmptyRepo;

#[async_trait]
impl Repository for EmptyRepo {
    async fn list_typography(&self) -> Result<Vec<TypographyStyle>, sqlx::Error> {
        Ok(vec![])
    }
    async fn update_typography(
        &self,
        _id: Uuid,
        _form: TypographyForm,
    ) -> Result<Option<TypographyStyle>, sqlx::Error> {
        Ok(None)
    }
    async fn list_variables(&self, _category: Option<String>) -> Result<Vec<CssVariable>, sqlx::Error> {
        Ok(vec![])
    }
    async fn update_variable(&self, _id: Uuid, _form: VariableForm) -> Result<Option<CssVariable>, sqlx::Error> {
        Ok(None)
    }
}

// --- Live server ---

pub struct TestApp {
    pub address: String,
    pub identity: Arc<MockIdentityService>,
    pub admin: AuthUser,
    pub session: Session,
    pub cookie: String,
    pub client: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let identity = Arc::new(MockIdentityService::new());
    let admin = identity.add_admin("admin@example.com", "password123");
    let session = identity.issue_session(&admin);

    let config = AppConfig::default();
    let session_cookies = SessionCookies::for_config(&config);
    let cookie = format!("{}={}", session_cookies.name(), cookies::encode(&session));

    let state = AppState::new(
        identity.clone() as IdentityState,
        Arc::new(EmptyRepo) as RepositoryState,
        config,
    );
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Redirects are what these tests assert on.
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();

    TestApp {
        address,
        identity,
        admin,
        session,
        cookie,
        client,
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_login_then_browse_dashboard() {
    let app = spawn_app().await;

    let login = app
        .client
        .post(format!("{}/login", app.address))
        .form(&[("email", "admin@example.com"), ("password", "password123")])
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::SEE_OTHER);
    assert_eq!(login.headers()[header::LOCATION], "/dashboard");

    let cookie = login.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let dashboard = app
        .client
        .get(format!("{}/dashboard", app.address))
        .header(header::COOKIE, cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(dashboard.status(), StatusCode::OK);
    let view: serde_json::Value = dashboard.json().await.unwrap();
    assert_eq!(view["email"], "admin@example.com");
}

#[tokio::test]
async fn test_session_watch_requires_a_session() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/session/watch", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/login");
}

#[tokio::test]
async fn test_session_watch_streams_redirect_on_sign_out() {
    let app = spawn_app().await;

    let mut response = app
        .client
        .get(format!("{}/session/watch", app.address))
        .header(header::COOKIE, &app.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(app.identity.subscriber_count(), 1);

    // Signed out from another tab.
    app.identity.sign_out(&app.admin, &app.session).await.unwrap();

    let mut received = String::new();
    let read = async {
        while let Some(chunk) = response.chunk().await.unwrap() {
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    };
    timeout(Duration::from_secs(5), read)
        .await
        .expect("stream should end after the redirect");

    assert!(received.contains("event: redirect\ndata: /login"));
    assert_eq!(received.matches("event: redirect").count(), 1);
}

#[tokio::test]
async fn test_session_watch_reacts_to_account_deletion() {
    let app = spawn_app().await;

    let mut response = app
        .client
        .get(format!("{}/session/watch", app.address))
        .header(header::COOKIE, &app.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    app.identity.delete_user(app.admin.id).await.unwrap();

    let first = timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("redirect event")
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&first).contains("data: /login"));
}
