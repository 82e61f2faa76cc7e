//! Startup reconstruction of a persisted session.
//!
//! ```text
//! NO_DATA ──► PARSE ──► EXPIRY_CHECK ──► REMOTE_VALIDATE ──► VALID
//!    │          │            │                 │   ▲
//!    ▼          ▼            ▼                 ▼   │
//! INVALID    INVALID      INVALID          RETRY_ONCE ──► INVALID
//! ```
//!
//! Every INVALID exit (except `Busy`) clears the credential store. The
//! whole sequence runs under the bootstrap deadline.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::api::ApiError;
use crate::models::{Credential, Identity};

use super::credentials::{self, RawCredentials};
use super::session::SessionManager;
use super::token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Valid(Credential),
    Invalid(InvalidReason),
}

impl BootstrapOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, BootstrapOutcome::Valid(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Another bootstrap is running; nothing was touched.
    Busy,
    /// Token, user or role entry absent.
    MissingData,
    /// User or role entry is not valid JSON.
    Corrupt,
    /// The credential store itself could not be read.
    StoreUnavailable,
    /// Expired token and the refresh failed.
    RefreshFailed,
    /// Auth Service rejected the token and the retry did not help.
    Rejected,
    /// The bootstrap deadline elapsed.
    Stalled,
}

impl InvalidReason {
    /// Whether the user should be told their session ended.
    pub fn is_expiry(&self) -> bool {
        matches!(
            self,
            InvalidReason::RefreshFailed | InvalidReason::Rejected | InvalidReason::Stalled
        )
    }
}

/// Result of one validate call.
enum Validation {
    Accepted(Option<Identity>),
    Rejected(ApiError),
    Unreachable(ApiError),
}

/// Holds `is_validating` for the lifetime of one bootstrap.
struct ValidatingGuard<'a>(&'a AtomicBool);

impl<'a> ValidatingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ValidatingGuard(flag))
    }
}

impl Drop for ValidatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionManager {
    /// Reconstruct and validate the persisted session.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        let Some(_guard) = ValidatingGuard::acquire(&self.inner.state.is_validating) else {
            debug!("Bootstrap already in progress");
            return BootstrapOutcome::Invalid(InvalidReason::Busy);
        };

        let deadline = self.inner.config.bootstrap_deadline();
        let outcome = match tokio::time::timeout(deadline, self.run_bootstrap()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(deadline_secs = deadline.as_secs_f64(), "Session bootstrap stalled");
                self.supersede_refresh();
                BootstrapOutcome::Invalid(InvalidReason::Stalled)
            }
        };

        match &outcome {
            BootstrapOutcome::Valid(credential) => {
                info!(username = %credential.user.username, "Session restored");
            }
            BootstrapOutcome::Invalid(reason) => {
                info!(?reason, "No valid session");
                self.clear_credentials();
            }
        }
        outcome
    }

    async fn run_bootstrap(&self) -> BootstrapOutcome {
        let raw = match credentials::load_raw(self.store()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read credential store");
                return BootstrapOutcome::Invalid(InvalidReason::StoreUnavailable);
            }
        };

        let mut credential = match Self::parse_stored(&raw) {
            Ok(credential) => credential,
            Err(reason) => return BootstrapOutcome::Invalid(reason),
        };

        if token::is_expired(&credential.token) {
            debug!("Stored token expired, refreshing before validation");
            match self.refresh().await {
                Some(fresh) => credential.token = fresh,
                None => return BootstrapOutcome::Invalid(InvalidReason::RefreshFailed),
            }
        }

        match self.validate(&credential.token).await {
            Validation::Accepted(echoed) => Self::accept(credential, echoed),
            Validation::Unreachable(e) => Self::soft_pass(credential, e),
            Validation::Rejected(e) => {
                debug!(error = %e, "Token rejected, retrying once with a refreshed token");
                let Some(fresh) = self.refresh().await else {
                    return BootstrapOutcome::Invalid(InvalidReason::Rejected);
                };
                credential.token = fresh;
                match self.validate(&credential.token).await {
                    Validation::Accepted(echoed) => Self::accept(credential, echoed),
                    Validation::Unreachable(e) => Self::soft_pass(credential, e),
                    Validation::Rejected(e) => {
                        warn!(error = %e, "Refreshed token rejected");
                        BootstrapOutcome::Invalid(InvalidReason::Rejected)
                    }
                }
            }
        }
    }

    fn parse_stored(raw: &RawCredentials) -> Result<Credential, InvalidReason> {
        match raw.parse() {
            None => {
                debug!(
                    token = raw.token.is_some(),
                    user = raw.user.is_some(),
                    role = raw.role.is_some(),
                    "Incomplete stored session"
                );
                Err(InvalidReason::MissingData)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Stored session is corrupt");
                Err(InvalidReason::Corrupt)
            }
            Some(Ok(credential)) => Ok(credential),
        }
    }

    async fn validate(&self, token: &str) -> Validation {
        let timeout = self.inner.config.validate_timeout();
        match self.inner.api.validate_token(token, timeout).await {
            Ok(echoed) => Validation::Accepted(echoed),
            Err(e) if e.is_transient() => Validation::Unreachable(e),
            Err(e) => Validation::Rejected(e),
        }
    }

    fn accept(credential: Credential, echoed: Option<Identity>) -> BootstrapOutcome {
        if let Some(echoed) = echoed {
            if echoed.username != credential.user.username {
                warn!(
                    stored = %credential.user.username,
                    echoed = %echoed.username,
                    "Auth Service identity differs from stored identity"
                );
            }
        }
        BootstrapOutcome::Valid(credential)
    }

    // Availability over strictness: a role revoked while we were offline
    // stays in effect until the next successful validation.
    fn soft_pass(credential: Credential, error: ApiError) -> BootstrapOutcome {
        warn!(error = %error, "Auth Service unreachable, trusting stored session");
        BootstrapOutcome::Valid(credential)
    }
}
