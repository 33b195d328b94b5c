//! Identity service boundary.
//!
//! Sessions are issued, refreshed and revoked by the hosted identity service
//! (Supabase GoTrue). The rest of the crate only observes them through the
//! `IdentityService` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::dangerous::insecure_decode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AdminUser, CreateUserRequest};

pub mod mock;
pub mod supabase;

pub use mock::MockIdentityService;
pub use supabase::SupabaseAuthClient;

/// Sessions expiring within this window are refreshed before use.
pub const EXPIRY_MARGIN_SECS: i64 = 90;

/// Capacity of the auth-state broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session
///
/// The credential issued by the identity service, exactly as it travels in the
/// session cookie. Treated as opaque apart from expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AdminUser>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Deserialize)]
struct TokenClaims {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    session_id: Option<String>,
}

impl Session {
    /// Expiry in unix seconds, from the session itself or else the access token's `exp`.
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at.or_else(|| token_expiry(&self.access_token))
    }

    /// True when the access token is expired or about to be.
    pub fn is_expiring(&self, now: i64) -> bool {
        match self.expiry() {
            Some(exp) => exp - now <= EXPIRY_MARGIN_SECS,
            None => false,
        }
    }

    pub fn is_expiring_now(&self) -> bool {
        self.is_expiring(Utc::now().timestamp())
    }

    /// session_id
    ///
    /// Identifies the sign-in this session belongs to. GoTrue access tokens carry
    /// a `session_id` claim that survives refreshes; for opaque tokens the refresh
    /// token stands in.
    pub fn session_id(&self) -> String {
        token_claims(&self.access_token)
            .and_then(|claims| claims.session_id)
            .unwrap_or_else(|| self.refresh_token.clone())
    }
}

/// token_expiry
///
/// Reads the `exp` claim of an access token without verifying its signature.
/// Only used as a refresh hint; validity is always decided by the identity
/// service itself.
pub fn token_expiry(token: &str) -> Option<i64> {
    token_claims(token).and_then(|claims| claims.exp)
}

fn token_claims(token: &str) -> Option<TokenClaims> {
    insecure_decode::<TokenClaims>(token).ok().map(|data| data.claims)
}

/// AuthUser
///
/// The principal a session resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

impl From<&AdminUser> for AuthUser {
    fn from(user: &AdminUser) -> Self {
        Self {
            id: user.id,
            email: user.email.clone().unwrap_or_default(),
        }
    }
}

/// What a lookup did to the session that was presented.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Unchanged,
    /// The identity service issued a new session; the caller must persist it.
    Refreshed(Session),
    /// The identity service rejected the session; the caller should forget it.
    Revoked,
}

/// UserLookup
///
/// Result of `get_user`: the resolved user (if any) and what happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLookup {
    pub user: Option<AuthUser>,
    pub session: SessionChange,
}

impl UserLookup {
    pub fn resolved(user: AuthUser) -> Self {
        Self { user: Some(user), session: SessionChange::Unchanged }
    }

    pub fn unresolved() -> Self {
        Self { user: None, session: SessionChange::Unchanged }
    }

    pub fn revoked() -> Self {
        Self { user: None, session: SessionChange::Revoked }
    }

    /// The session to use from now on, given the one that was presented.
    pub fn current_session(&self, presented: &Session) -> Option<Session> {
        match &self.session {
            SessionChange::Unchanged => Some(presented.clone()),
            SessionChange::Refreshed(session) => Some(session.clone()),
            SessionChange::Revoked => None,
        }
    }
}

/// AuthEvent
///
/// Auth-state change published by the identity client. Sign-out and refresh
/// concern one session (`session_id`, see `Session::session_id`); only account
/// deletion ends every session of a user.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { user_id: Uuid },
    SignedOut { user_id: Uuid, session_id: String },
    /// `session_id` names the session that was refreshed. `None` means the
    /// refresh was refused and that session is over.
    TokenRefreshed { user_id: Uuid, session_id: String, session: Option<Session> },
    UserUpdated { user_id: Uuid },
    UserDeleted { user_id: Uuid },
}

impl AuthEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            AuthEvent::SignedIn { user_id }
            | AuthEvent::SignedOut { user_id, .. }
            | AuthEvent::TokenRefreshed { user_id, .. }
            | AuthEvent::UserUpdated { user_id }
            | AuthEvent::UserDeleted { user_id } => *user_id,
        }
    }

    /// True when the event ends session `session_id` of `user_id`.
    pub fn ends(&self, user_id: Uuid, session_id: &str) -> bool {
        match self {
            AuthEvent::SignedOut { user_id: id, session_id: sid }
            | AuthEvent::TokenRefreshed { user_id: id, session_id: sid, session: None } => {
                *id == user_id && sid == session_id
            }
            AuthEvent::UserDeleted { user_id: id } => *id == user_id,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("identity service returned {status}: {message}")]
    Unexpected { status: u16, message: String },
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("a user with this email address has already been registered")]
    AlreadyRegistered,
    #[error("user not found")]
    NotFound,
    #[error("admin API requires SUPABASE_SERVICE_ROLE_KEY")]
    AdminNotConfigured,
}

/// IdentityService Contract
///
/// Everything the admin panel needs from the identity provider. Implemented by
/// `SupabaseAuthClient` in production and `MockIdentityService` in tests.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolves the user behind `session`, refreshing it first when it is about
    /// to expire. `Ok` with no user is a definitive answer; `Err` is transient.
    async fn get_user(&self, session: &Session) -> Result<UserLookup, IdentityError>;

    /// Password grant. Publishes `SignedIn`.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Revokes `session`, which must be the one `user` was resolved from.
    /// Publishes `SignedOut` for that session only.
    async fn sign_out(&self, user: &AuthUser, session: &Session) -> Result<(), IdentityError>;

    /// Subscribes to auth-state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    // --- Administrator accounts (service role) ---
    async fn list_users(&self) -> Result<Vec<AdminUser>, IdentityError>;
    async fn create_user(&self, request: &CreateUserRequest) -> Result<AdminUser, IdentityError>;
    /// Deletes the account and publishes `UserDeleted` for it.
    async fn delete_user(&self, id: Uuid) -> Result<(), IdentityError>;
}

/// IdentityState
///
/// The identity client as shared through `AppState`.
pub type IdentityState = Arc<dyn IdentityService>;
