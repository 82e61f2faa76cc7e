//! The session lifecycle manager.
//!
//! `SessionManager` owns the persisted credential and the refresh
//! bookkeeping. Bootstrap lives in `bootstrap.rs`, the request
//! interceptors in `interceptor.rs` and coordinated logout in `logout.rs`;
//! they all extend this type.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, WeakShared};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, LoginRequest};
use crate::config::{Config, SessionConfig};
use crate::models::{Credential, Identity, SessionSnapshot};

use super::credentials::{self, CredentialStore, StoreKey};
use super::token;

/// Capacity of the session event channel.
/// Events are rare (login, logout, expiry); 16 leaves room for slow receivers.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications for whoever renders the session to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(Identity),
    LoggedOut,
    /// The session ended without the user asking; show "please log in again".
    Expired,
}

/// Result of one refresh attempt, shared by every concurrent caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(String),
    /// Auth Service answered 401/403. Credentials were cleared.
    Rejected,
    /// No response (network error, timeout) or an unexpected answer.
    Transient,
    /// Attempt cap reached. Credentials were cleared, no request was sent.
    Exhausted,
    /// Nothing stored to refresh.
    NoToken,
    /// The session was replaced or ended while the request was out.
    /// The answer belonged to the old token and was dropped unread.
    Superseded,
}

impl RefreshOutcome {
    pub fn token(self) -> Option<String> {
        match self {
            RefreshOutcome::Refreshed(token) => Some(token),
            _ => None,
        }
    }
}

/// Counters and flags governing refresh, bootstrap and logout.
#[derive(Debug, Default)]
pub struct RefreshState {
    pub(crate) refresh_attempts: AtomicU32,
    pub(crate) is_validating: AtomicBool,
    pub(crate) is_logging_out: AtomicBool,
}

impl RefreshState {
    pub fn refresh_attempts(&self) -> u32 {
        self.refresh_attempts.load(Ordering::SeqCst)
    }

    pub fn is_validating(&self) -> bool {
        self.is_validating.load(Ordering::SeqCst)
    }

    pub fn is_logging_out(&self) -> bool {
        self.is_logging_out.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.refresh_attempts.store(0, Ordering::SeqCst);
        self.is_validating.store(false, Ordering::SeqCst);
        self.is_logging_out.store(false, Ordering::SeqCst);
    }
}

type RefreshFuture = BoxFuture<'static, RefreshOutcome>;

/// The refresh currently running. Only callers awaiting it keep it alive;
/// once they are all gone the weak handle no longer upgrades.
struct InFlight {
    id: u64,
    refresh: WeakShared<RefreshFuture>,
}

pub(crate) struct Inner {
    pub(crate) api: ApiClient,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) config: SessionConfig,
    pub(crate) state: RefreshState,
    in_flight: Mutex<Option<InFlight>>,
    next_refresh_id: AtomicU64,
    /// Bumped whenever the stored session is replaced or ended.
    generation: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// Handle to the session. Clone is cheap; all clones share one state.
#[derive(Clone)]
pub struct SessionManager {
    pub(crate) inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                config,
                state: RefreshState::default(),
                in_flight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Build the API client and credential store described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api = ApiClient::with_timeout(config.api_base_url(), config.session.request_timeout())?;
        let store = config.build_store()?;
        Ok(Self::new(api, store, config.session.clone()))
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.inner.store.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &RefreshState {
        &self.inner.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No receivers is fine; nobody is rendering notifications.
        let _ = self.inner.events.send(event);
    }

    /// Zero the counters, drop the flags and abandon any refresh still in
    /// flight. Test setup, login and logout use this.
    pub fn reset_state(&self) {
        self.supersede_refresh();
        self.inner.state.reset();
    }

    /// Detach the running refresh from the session. Whoever is still awaiting
    /// it gets `Superseded`; the next `refresh` starts over with the current
    /// token.
    pub(crate) fn supersede_refresh(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if self.in_flight().take().is_some() {
            debug!("Abandoned in-flight token refresh");
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Credential access =====

    /// Current token as persisted, if any.
    pub fn token(&self) -> Option<String> {
        match self.store().get(StoreKey::Token) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read token from credential store");
                None
            }
        }
    }

    /// The stored credential, if all three entries are present and parse.
    pub fn current_credential(&self) -> Option<Credential> {
        let raw = credentials::load_raw(self.store())
            .map_err(|e| warn!(error = %e, "Failed to read credential store"))
            .ok()?;
        raw.parse()?.ok()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let credential = self.current_credential()?;
        Some(SessionSnapshot {
            username: credential.user.username,
            role: credential.role,
            expires_at: token::decode_claims(&credential.token).map(|c| c.exp),
            refresh_attempts: self.inner.state.refresh_attempts(),
        })
    }

    pub(crate) fn clear_credentials(&self) {
        if let Err(e) = credentials::clear_auth_data(self.store()) {
            error!(error = %e, "Failed to clear credential store");
        }
    }

    // ===== Login / logout =====

    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let credential = self.inner.api.login(&request).await?.into_credential();
        self.establish(credential)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Credential, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let credential = self.inner.api.register(&request).await?.into_credential();
        self.establish(credential)
    }

    fn establish(&self, credential: Credential) -> Result<Credential, ApiError> {
        self.reset_state();
        credentials::save_credential(self.store(), &credential)?;
        info!(username = %credential.user.username, role = %credential.role, "Logged in");
        self.publish(SessionEvent::LoggedIn(credential.user.clone()));
        Ok(credential)
    }

    /// Explicit, user-requested logout.
    pub fn logout(&self) {
        self.reset_state();
        self.clear_credentials();
        info!("Logged out");
        self.publish(SessionEvent::LoggedOut);
    }

    // ===== Refresh coordination =====

    /// Exchange the stored token for a new one. `None` on any failure.
    pub async fn refresh(&self) -> Option<String> {
        self.refresh_outcome().await.token()
    }

    /// Like `refresh`, but says why it failed.
    ///
    /// Concurrent callers join the refresh already in flight and observe its
    /// outcome; only the caller that starts it consumes an attempt.
    pub async fn refresh_outcome(&self) -> RefreshOutcome {
        let shared = {
            let mut slot = self.in_flight();
            match slot.as_ref().and_then(|running| running.refresh.upgrade()) {
                Some(running) => {
                    debug!("Joining in-flight token refresh");
                    running
                }
                None => {
                    let id = self.inner.next_refresh_id.fetch_add(1, Ordering::SeqCst);
                    let this = self.clone();
                    let fut = async move {
                        let outcome = this.run_refresh().await;
                        this.finish_refresh(id);
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = fut.downgrade().map(|refresh| InFlight { id, refresh });
                    fut
                }
            }
        };
        shared.await
    }

    fn finish_refresh(&self, id: u64) {
        let mut slot = self.in_flight();
        if slot.as_ref().is_some_and(|running| running.id == id) {
            slot.take();
        }
    }

    /// Whether the session `current` was read from is still the stored one.
    fn still_current(&self, generation: u64, current: &str) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
            && self.token().as_deref() == Some(current)
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let Some(current) = self.token() else {
            debug!("No stored token to refresh");
            return RefreshOutcome::NoToken;
        };

        let max = self.inner.config.max_refresh_attempts;
        let reserved = self.inner.state.refresh_attempts.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| if n >= max { None } else { Some(n + 1) },
        );
        match reserved {
            Ok(previous) => debug!(attempt = previous + 1, max, "Refreshing token"),
            Err(attempts) => {
                warn!(attempts, "Refresh attempts exhausted, clearing session");
                self.clear_credentials();
                return RefreshOutcome::Exhausted;
            }
        }

        let result = self.inner.api.refresh_token(&current).await;
        if !self.still_current(generation, &current) {
            debug!("Session changed during refresh, discarding the answer");
            return RefreshOutcome::Superseded;
        }

        match result {
            Ok(fresh) => {
                if let Err(e) = self.store().set(StoreKey::Token, &fresh) {
                    warn!(error = %e, "Failed to persist refreshed token");
                }
                self.inner.state.refresh_attempts.store(0, Ordering::SeqCst);
                info!("Token refreshed");
                RefreshOutcome::Refreshed(fresh)
            }
            Err(e) if e.is_auth_rejection() => {
                warn!(error = %e, "Refresh rejected by Auth Service, clearing session");
                self.clear_credentials();
                self.inner.state.refresh_attempts.store(0, Ordering::SeqCst);
                RefreshOutcome::Rejected
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                RefreshOutcome::Transient
            }
        }
    }
}
