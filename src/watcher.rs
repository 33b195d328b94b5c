//! Session Watcher.
//!
//! Lives for as long as a protected page stays open and forces a logout plus a
//! redirect to the login page once the session it was mounted with stops being
//! valid. Two signals can end it: an identity event ending this very session
//! (or deleting the account), and (when polling is enabled) a periodic lookup
//! that no longer resolves the user. Transient lookup failures never end it.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, broadcast::error::RecvError, mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    guard::LOGIN_PATH,
    identity::{AuthEvent, AuthUser, IdentityState, Session},
};

/// Navigator
///
/// Where the watcher sends the page once the session is gone. A browser router in
/// spirit: the SSE endpoint forwards the location to the page, tests record it.
pub trait Navigator: Send + Sync {
    fn redirect(&self, location: &str);
}

/// ChannelNavigator
///
/// Forwards redirects into a channel, e.g. to an SSE stream.
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl Navigator for ChannelNavigator {
    fn redirect(&self, location: &str) {
        // The page may already be gone.
        let _ = self.tx.send(location.to_string());
    }
}

/// WatchPolicy
///
/// `EventOnly` reacts to sign-out events alone. `EventAndPoll` also re-validates
/// the session on a fixed interval, which catches accounts deleted out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPolicy {
    EventOnly,
    EventAndPoll(Duration),
}

impl WatchPolicy {
    fn poll_period(self) -> Option<Duration> {
        match self {
            WatchPolicy::EventOnly => None,
            WatchPolicy::EventAndPoll(period) if period.is_zero() => None,
            WatchPolicy::EventAndPoll(period) => Some(period),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Armed,
    /// Terminal: the redirect has been issued.
    Invalidated,
}

/// SessionWatcher
///
/// Factory for per-page watches sharing one identity client and navigator.
#[derive(Clone)]
pub struct SessionWatcher {
    identity: IdentityState,
    navigator: Arc<dyn Navigator>,
    policy: WatchPolicy,
}

impl SessionWatcher {
    pub fn new(identity: IdentityState, navigator: Arc<dyn Navigator>, policy: WatchPolicy) -> Self {
        Self {
            identity,
            navigator,
            policy,
        }
    }

    /// mount
    ///
    /// Arms a watch over `session`. The event subscription is taken before this
    /// returns, so nothing published after mount is missed. The first poll
    /// happens one full period later; the session was validated just before mount.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self, user: AuthUser, session: Session) -> WatchHandle {
        let events = self.identity.subscribe();
        let (state_tx, state_rx) = watch::channel(WatchState::Armed);

        tracing::debug!(user_id = %user.id, policy = ?self.policy, "session watcher armed");

        let task = WatchTask {
            identity: self.identity.clone(),
            navigator: self.navigator.clone(),
            user,
            session,
            events,
            state: state_tx,
        };
        let join = tokio::spawn(task.run(self.policy.poll_period()));

        WatchHandle {
            task: join,
            state: state_rx,
        }
    }
}

/// WatchHandle
///
/// The watch subscription of one mounted page. Dropping it (or calling
/// `unmount`) cancels the timer and the event subscription immediately; no
/// callback fires afterwards.
pub struct WatchHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<WatchState>,
}

impl WatchHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    /// Resolves once the watch has invalidated the session. Never resolves for a
    /// watch that ends any other way.
    pub async fn invalidated(&mut self) {
        if self.state.wait_for(|s| *s == WatchState::Invalidated).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn unmount(self) {}
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct WatchTask {
    identity: IdentityState,
    navigator: Arc<dyn Navigator>,
    user: AuthUser,
    session: Session,
    events: broadcast::Receiver<AuthEvent>,
    state: watch::Sender<WatchState>,
}

impl WatchTask {
    async fn run(mut self, poll_period: Option<Duration>) {
        let mut ticker = poll_period.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            // A check that outlives the period swallows the missed ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut events_open = true;

        loop {
            if !events_open && ticker.is_none() {
                tracing::debug!(user_id = %self.user.id, "auth events closed, session watcher stopping");
                return;
            }

            let invalidated = tokio::select! {
                event = self.events.recv(), if events_open => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session watcher lagged behind auth events, re-checking");
                        self.check().await
                    }
                    Err(RecvError::Closed) => {
                        events_open = false;
                        false
                    }
                },
                _ = next_tick(&mut ticker) => self.check().await,
            };

            if invalidated {
                return;
            }
        }
    }

    fn on_event(&mut self, event: AuthEvent) -> bool {
        if event.user_id() != self.user.id {
            return false;
        }
        // Other sessions of the same user (another tab's login, another device) are not ours.
        let watched = self.session.session_id();
        if event.ends(self.user.id, &watched) {
            self.invalidate("signed out");
            return true;
        }
        if let AuthEvent::TokenRefreshed { session_id, session: Some(session), .. } = event {
            if session_id == watched {
                self.session = session;
            }
        }
        false
    }

    /// One poll. Returns true when the session was invalidated.
    async fn check(&mut self) -> bool {
        let lookup = match self.identity.get_user(&self.session).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(user_id = %self.user.id, error = %e, "session check failed, watcher stays armed");
                return false;
            }
        };

        if lookup.user.is_some() {
            if let Some(session) = lookup.current_session(&self.session) {
                self.session = session;
            }
            return false;
        }

        if let Err(e) = self.identity.sign_out(&self.user, &self.session).await {
            tracing::warn!(user_id = %self.user.id, error = %e, "sign-out after failed session check did not complete");
        }
        self.invalidate("session no longer resolves");
        true
    }

    fn invalidate(&self, reason: &str) {
        // The page unmounted while this was in flight.
        if self.state.is_closed() {
            return;
        }
        tracing::info!(user_id = %self.user.id, reason, "session invalidated, redirecting to login");
        self.navigator.redirect(LOGIN_PATH);
        self.state.send_replace(WatchState::Invalidated);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
