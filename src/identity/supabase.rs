use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthEvent, AuthUser, EVENT_CHANNEL_CAPACITY, IdentityError, IdentityService, Session,
    SessionChange, UserLookup,
};
use crate::{
    config::AppConfig,
    models::{AdminUser, CreateUserRequest},
};

/// Page size used when listing administrators; the panel shows them all at once.
const ADMIN_PAGE_SIZE: u32 = 1000;

/// SupabaseAuthClient
///
/// `IdentityService` backed by the Supabase GoTrue REST API. One instance is built
/// in `main` and shared; it also owns the auth-state broadcast channel, so every
/// sign-in, refresh, sign-out and account deletion it performs is published to
/// subscribers (the Session Watchers). Sign-out uses `scope=local`, so it ends one
/// session and its event names only that session.
pub struct SupabaseAuthClient {
    http: Client,
    auth_url: String,
    anon_key: String,
    service_role_key: Option<String>,
    events: broadcast::Sender<AuthEvent>,
}

/// Token endpoint payload. `expires_at` is missing on older GoTrue releases.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<AdminUser>,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .or_else(|| token.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_in: token.expires_in,
            expires_at,
            user: token.user,
        }
    }
}

#[derive(Deserialize)]
struct UserListPage {
    #[serde(default)]
    users: Vec<AdminUser>,
}

impl SupabaseAuthClient {
    pub fn new(config: &AppConfig) -> Result<Self, IdentityError> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            http,
            auth_url: format!("{}/auth/v1", config.supabase_url),
            anon_key: config.supabase_anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
            events,
        })
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is the normal case between page mounts.
        let _ = self.events.send(event);
    }

    fn public(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    fn admin(&self, builder: RequestBuilder) -> Result<RequestBuilder, IdentityError> {
        let key = self.service_role_key.as_deref().ok_or(IdentityError::AdminNotConfigured)?;
        Ok(builder.header("apikey", key).bearer_auth(key))
    }

    /// Exchanges the refresh token for a new session. `None` means the identity
    /// service rejected the refresh token.
    async fn refresh(&self, session: &Session) -> Result<Option<Session>, IdentityError> {
        let response = self
            .public(self.http.post(format!("{}/token", self.auth_url)))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": session.refresh_token }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let refreshed: Session = response.json::<TokenResponse>().await?.into();
                // The user on a token response comes from GoTrue, not from the cookie.
                if let Some(user_id) = refreshed.user.as_ref().map(|u| u.id) {
                    self.publish(AuthEvent::TokenRefreshed {
                        user_id,
                        session_id: session.session_id(),
                        session: Some(refreshed.clone()),
                    });
                }
                tracing::debug!("session refreshed");
                Ok(Some(refreshed))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::debug!(status = %response.status(), "refresh token rejected");
                Ok(None)
            }
            _ => Err(unexpected(response).await),
        }
    }

    /// GET /user. `None` means the access token no longer maps to a live account.
    async fn fetch_user(&self, access_token: &str) -> Result<Option<AdminUser>, IdentityError> {
        let response = self
            .public(self.http.get(format!("{}/user", self.auth_url)))
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<AdminUser>().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected(response).await),
        }
    }
}

#[async_trait]
impl IdentityService for SupabaseAuthClient {
    async fn get_user(&self, session: &Session) -> Result<UserLookup, IdentityError> {
        let (current, change) = if session.is_expiring_now() {
            match self.refresh(session).await? {
                Some(refreshed) => (refreshed.clone(), SessionChange::Refreshed(refreshed)),
                None => return Ok(UserLookup::revoked()),
            }
        } else {
            (session.clone(), SessionChange::Unchanged)
        };

        match self.fetch_user(&current.access_token).await? {
            Some(user) => Ok(UserLookup {
                user: Some(AuthUser::from(&user)),
                session: change,
            }),
            None => Ok(UserLookup::revoked()),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let response = self
            .public(self.http.post(format!("{}/token", self.auth_url)))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let session: Session = response.json::<TokenResponse>().await?.into();
                if let Some(user) = &session.user {
                    tracing::info!(user_id = %user.id, "administrator signed in");
                    self.publish(AuthEvent::SignedIn { user_id: user.id });
                }
                Ok(session)
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(IdentityError::InvalidCredentials),
            _ => Err(unexpected(response).await),
        }
    }

    async fn sign_out(&self, user: &AuthUser, session: &Session) -> Result<(), IdentityError> {
        let response = self
            .public(self.http.post(format!("{}/logout", self.auth_url)))
            .query(&[("scope", "local")])
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = response.status();
        // 401/404: the session is already gone, which is what we wanted.
        if !(status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND) {
            return Err(unexpected(response).await);
        }

        self.publish(AuthEvent::SignedOut {
            user_id: user.id,
            session_id: session.session_id(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn list_users(&self) -> Result<Vec<AdminUser>, IdentityError> {
        let response = self
            .admin(self.http.get(format!("{}/admin/users", self.auth_url)))?
            .query(&[("page", 1), ("per_page", ADMIN_PAGE_SIZE)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(unexpected(response).await);
        }
        Ok(response.json::<UserListPage>().await?.users)
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<AdminUser, IdentityError> {
        let response = self
            .admin(self.http.post(format!("{}/admin/users", self.auth_url)))?
            .json(&serde_json::json!({
                "email": request.email,
                "password": request.password,
                "email_confirm": request.email_confirm,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            let user = response.json::<AdminUser>().await?;
            tracing::info!(user_id = %user.id, "administrator account created");
            return Ok(user);
        }

        match unexpected(response).await {
            IdentityError::Unexpected { status, message }
                if status == StatusCode::UNPROCESSABLE_ENTITY.as_u16()
                    || message.contains("already been registered")
                    || message.contains("already registered") =>
            {
                Err(IdentityError::AlreadyRegistered)
            }
            other => Err(other),
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), IdentityError> {
        let response = self
            .admin(self.http.delete(format!("{}/admin/users/{}", self.auth_url, id)))?
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                tracing::info!(user_id = %id, "administrator account deleted");
                self.publish(AuthEvent::UserDeleted { user_id: id });
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound),
            _ => Err(unexpected(response).await),
        }
    }
}

/// Error body shapes vary between GoTrue endpoints.
#[derive(Deserialize, Default)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

async fn unexpected(response: Response) -> IdentityError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or(body);
    IdentityError::Unexpected { status, message }
}
