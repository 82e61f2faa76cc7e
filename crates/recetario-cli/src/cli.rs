use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use recetario_core::config::API_URL_ENV;
use recetario_core::StoreBackend;
use reqwest::Method;

#[derive(Parser)]
#[command(name = "recetario")]
#[command(about = "Recipe catalog client", version)]
pub struct Cli {
    /// Auth/recipe API base URL, e.g. http://localhost:5000/api
    #[arg(long, env = API_URL_ENV, global = true)]
    pub api_url: Option<String>,
    /// Credential store: keyring or file
    #[arg(long, value_parser = parse_store, global = true)]
    pub store: Option<StoreBackend>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session
    Login(CredentialsArgs),
    /// Create an account and log in
    Register(CredentialsArgs),
    /// Forget the stored session
    Logout,
    /// Validate the stored session and show who is logged in
    Status,
    /// Send an authenticated request, e.g. `request GET /favorites`
    Request(RequestArgs),
}

#[derive(Args)]
pub struct CredentialsArgs {
    #[arg(short, long)]
    pub username: Option<String>,
}

#[derive(Args)]
pub struct RequestArgs {
    #[arg(value_parser = parse_method)]
    pub method: Method,
    /// Path relative to the API base URL
    pub path: String,
    /// JSON request body
    #[arg(long)]
    pub data: Option<String>,
}

/// Each invocation is a fresh process, so the session has to be persisted.
pub const MEMORY_STORE_UNSUPPORTED: &str =
    "the memory store does not outlive a single command; use keyring or file";

fn parse_store(value: &str) -> Result<StoreBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "keyring" => Ok(StoreBackend::Keyring),
        "file" => Ok(StoreBackend::File),
        "memory" => Err(MEMORY_STORE_UNSUPPORTED.to_string()),
        other => Err(format!("unknown store '{}': expected keyring or file", other)),
    }
}

/// Reject a store configured in `config.json` that the CLI cannot use.
pub fn check_store(store: StoreBackend) -> Result<StoreBackend, &'static str> {
    match store {
        StoreBackend::Memory => Err(MEMORY_STORE_UNSUPPORTED),
        other => Ok(other),
    }
}

fn parse_method(value: &str) -> Result<Method, String> {
    Method::from_bytes(value.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}
