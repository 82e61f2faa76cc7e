//! Recetario core - session lifecycle for the recipe catalog client.
//!
//! The backend issues short-lived JWTs. This crate keeps one persisted
//! credential alive across restarts: it validates it on startup, renews it
//! before and after it expires, and logs the user out exactly once when it
//! can no longer be renewed.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{BootstrapOutcome, InvalidReason, SessionClient, SessionEvent, SessionManager};
pub use config::{Config, SessionConfig, StoreBackend};
pub use models::{Credential, Identity, Role, SessionSnapshot};
