//! Coordinated logout after an unrecoverable authentication failure.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use super::session::{SessionEvent, SessionManager};

impl SessionManager {
    /// End the session because it can no longer be renewed.
    ///
    /// Any number of concurrent failures produce a single `Expired` event and
    /// a single clear. The guard re-arms after `logout_reset` so a later,
    /// genuine expiry is reported again. Returns `true` for the caller that
    /// performed the logout.
    pub fn expire_session(&self) -> bool {
        let state = &self.inner.state;
        if state
            .is_logging_out
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Logout already in progress");
            return false;
        }

        warn!("Session expired, logging out");
        self.supersede_refresh();
        self.clear_credentials();
        state.refresh_attempts.store(0, Ordering::SeqCst);
        self.publish(SessionEvent::Expired);

        let delay = self.inner.config.logout_reset();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::downgrade(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.state.is_logging_out.store(false, Ordering::SeqCst);
                    }
                });
            }
            // Nothing can race us without a runtime.
            Err(_) => state.is_logging_out.store(false, Ordering::SeqCst),
        }
        true
    }
}
