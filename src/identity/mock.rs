use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthEvent, AuthUser, EVENT_CHANNEL_CAPACITY, IdentityError, IdentityService, Session,
    SessionChange, UserLookup,
};
use crate::models::{AdminUser, CreateUserRequest};

/// MockIdentityService
///
/// In-memory `IdentityService` for unit and integration tests. Sessions are issued
/// explicitly by the test, lookups can be made to fail or to stall, and every call
/// is counted so tests can assert on what the guard and the watcher actually did.
pub struct MockIdentityService {
    // access token -> principal
    sessions: Mutex<HashMap<String, AuthUser>>,
    // refresh token -> replacement session handed out on the next lookup
    refreshes: Mutex<HashMap<String, Session>>,
    // email -> password
    passwords: Mutex<HashMap<String, String>>,
    directory: Mutex<Vec<AdminUser>>,
    failing: AtomicBool,
    lookup_delay: Option<Duration>,
    lookups: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sign_outs: AtomicUsize,
    events: broadcast::Sender<AuthEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: Mutex::new(HashMap::new()),
            refreshes: Mutex::new(HashMap::new()),
            passwords: Mutex::new(HashMap::new()),
            directory: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            lookup_delay: None,
            lookups: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
            events,
        }
    }

    /// Every lookup fails as if the identity service were unreachable.
    pub fn new_failing() -> Self {
        let mock = Self::new();
        mock.set_failing(true);
        mock
    }

    /// Every lookup takes `delay` before answering.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Registers an administrator account and returns its principal.
    pub fn add_admin(&self, email: &str, password: &str) -> AuthUser {
        let user = AdminUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            created_at: Some(Utc::now()),
            ..AdminUser::default()
        };
        let principal = AuthUser::from(&user);
        lock(&self.directory).push(user);
        lock(&self.passwords).insert(email.to_string(), password.to_string());
        principal
    }

    /// Issues a live session for `user`.
    pub fn issue_session(&self, user: &AuthUser) -> Session {
        let session = mock_session(user, Utc::now().timestamp() + 3600);
        lock(&self.sessions).insert(session.access_token.clone(), user.clone());
        session
    }

    /// Issues an expired session for `user` whose refresh token is still good.
    /// Returns `(expired, replacement)`; the replacement is what the next lookup
    /// hands back as `SessionChange::Refreshed`.
    pub fn issue_refreshable_session(&self, user: &AuthUser) -> (Session, Session) {
        let expired = mock_session(user, Utc::now().timestamp() - 60);
        let replacement = self.issue_session(user);
        lock(&self.refreshes).insert(expired.refresh_token.clone(), replacement.clone());
        (expired, replacement)
    }

    /// Invalidates `session` server-side without publishing anything, as an
    /// out-of-band account deletion would.
    pub fn revoke(&self, session: &Session) {
        lock(&self.sessions).remove(&session.access_token);
        lock(&self.refreshes).remove(&session.refresh_token);
    }

    /// Publishes an auth-state change to every subscriber.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_lookups(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn revoke_user(&self, user_id: Uuid) {
        lock(&self.sessions).retain(|_, user| user.id != user_id);
        lock(&self.refreshes).retain(|_, session| {
            session.user.as_ref().map(|u| u.id) != Some(user_id)
        });
    }

    fn resolve(&self, session: &Session) -> UserLookup {
        if let Some(user) = lock(&self.sessions).get(&session.access_token).cloned() {
            return UserLookup::resolved(user);
        }

        let replacement = lock(&self.refreshes).remove(&session.refresh_token);
        match replacement {
            Some(fresh) => match lock(&self.sessions).get(&fresh.access_token).cloned() {
                Some(user) => {
                    self.emit(AuthEvent::TokenRefreshed {
                        user_id: user.id,
                        session_id: session.session_id(),
                        session: Some(fresh.clone()),
                    });
                    UserLookup {
                        user: Some(user),
                        session: SessionChange::Refreshed(fresh),
                    }
                }
                None => UserLookup::revoked(),
            },
            None => UserLookup::revoked(),
        }
    }
}

fn mock_session(user: &AuthUser, expires_at: i64) -> Session {
    Session {
        access_token: format!("access-{}", Uuid::new_v4()),
        refresh_token: format!("refresh-{}", Uuid::new_v4()),
        token_type: "bearer".to_string(),
        expires_in: Some(3600),
        expires_at: Some(expires_at),
        user: Some(AdminUser {
            id: user.id,
            email: Some(user.email.clone()),
            ..AdminUser::default()
        }),
    }
}

/// Decrements the in-flight counter when a lookup finishes or is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityService for MockIdentityService {
    async fn get_user(&self, session: &Session) -> Result<UserLookup, IdentityError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(IdentityError::Unexpected {
                status: 503,
                message: "Mock Identity Error: Simulation requested".to_string(),
            });
        }
        Ok(self.resolve(session))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        if lock(&self.passwords).get(email).map(String::as_str) != Some(password) {
            return Err(IdentityError::InvalidCredentials);
        }
        let user = lock(&self.directory)
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .map(AuthUser::from)
            .ok_or(IdentityError::InvalidCredentials)?;

        let session = self.issue_session(&user);
        self.emit(AuthEvent::SignedIn { user_id: user.id });
        Ok(session)
    }

    async fn sign_out(&self, user: &AuthUser, session: &Session) -> Result<(), IdentityError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.revoke(session);
        self.emit(AuthEvent::SignedOut {
            user_id: user.id,
            session_id: session.session_id(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn list_users(&self) -> Result<Vec<AdminUser>, IdentityError> {
        Ok(lock(&self.directory).clone())
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<AdminUser, IdentityError> {
        let exists = lock(&self.directory)
            .iter()
            .any(|u| u.email.as_deref() == Some(request.email.as_str()));
        if exists {
            return Err(IdentityError::AlreadyRegistered);
        }

        let user = AdminUser {
            id: Uuid::new_v4(),
            email: Some(request.email.clone()),
            created_at: Some(Utc::now()),
            email_confirmed_at: request.email_confirm.then(Utc::now),
            ..AdminUser::default()
        };
        lock(&self.directory).push(user.clone());
        lock(&self.passwords).insert(request.email.clone(), request.password.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), IdentityError> {
        let removed = {
            let mut directory = lock(&self.directory);
            let before = directory.len();
            directory.retain(|u| u.id != id);
            directory.len() != before
        };
        if !removed {
            return Err(IdentityError::NotFound);
        }

        self.revoke_user(id);
        self.emit(AuthEvent::UserDeleted { user_id: id });
        Ok(())
    }
}
