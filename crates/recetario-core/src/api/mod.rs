//! REST client module for the recipe backend's Auth Service.
//!
//! This module provides the `ApiClient` for the login, register,
//! token validation and token refresh endpoints, plus the raw request
//! plumbing that `SessionClient` builds its interceptors on.

pub mod client;
pub mod error;

pub use client::{ApiClient, LoginRequest, LoginResponse};
pub use error::ApiError;
