//! Domain models shared between the session manager and the CLI.

pub mod user;

pub use user::{Credential, Identity, Role, SessionSnapshot};
