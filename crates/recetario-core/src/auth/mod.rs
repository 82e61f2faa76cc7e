//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `token`: advisory JWT inspection (expiry, near-expiry)
//! - `CredentialStore`: persisted token/user/role entries (keychain, file, memory)
//! - `SessionManager`: login, logout, single-flight token refresh
//! - `bootstrap`: startup validation of a persisted session
//! - `SessionClient`: request interceptors that attach and renew credentials
//!
//! At most two refresh attempts are made before a session is abandoned.

pub mod bootstrap;
pub mod credentials;
pub mod interceptor;
mod logout;
pub mod session;
pub mod token;

pub use bootstrap::{BootstrapOutcome, InvalidReason};
pub use credentials::{
    clear_auth_data, CredentialStore, FileStore, KeyringStore, MemoryStore, StoreError, StoreKey,
};
pub use interceptor::SessionClient;
pub use session::{RefreshOutcome, RefreshState, SessionEvent, SessionManager};
