//! Recetario CLI - log in to the recipe catalog and talk to its API.
//!
//! Every invocation restores the persisted session first, the same way the
//! web front end does on page load, then runs one command through the
//! session-aware client.

mod cli;

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use recetario_core::auth::token;
use recetario_core::{ApiError, BootstrapOutcome, Config, SessionEvent, SessionManager};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command, CredentialsArgs, RequestArgs};

const EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

/// Upper bound on waiting for queued notices at exit.
/// Clones held by spawned tasks (the logout guard re-arm) keep the channel
/// open until they finish.
const NOTICE_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // RUST_LOG wins; otherwise -v/-vv raise the default level
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = Some(url);
    }
    if let Some(store) = cli.store {
        config.store = store;
    }
    config.store = cli::check_store(config.store).map_err(anyhow::Error::msg)?;
    let session = SessionManager::from_config(&config)?;
    info!(api = %session.api().base_url(), store = ?config.store, "Recetario starting");

    let notices = spawn_notice_printer(&session);

    let code = match cli.command {
        Command::Login(args) => login(&session, &mut config, args, false).await?,
        Command::Register(args) => login(&session, &mut config, args, true).await?,
        Command::Logout => {
            session.logout();
            println!("Logged out.");
            ExitCode::SUCCESS
        }
        Command::Status => status(&session).await,
        Command::Request(args) => request(&session, args).await?,
    };

    // Closing the channel lets the printer drain pending notices and stop.
    drop(session);
    let _ = tokio::time::timeout(NOTICE_DRAIN_TIMEOUT, notices).await;
    Ok(code)
}

/// Print session notifications the way the web app raises a toast.
fn spawn_notice_printer(session: &SessionManager) -> tokio::task::JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Expired => eprintln!("{}", EXPIRED_NOTICE),
                other => debug!(event = ?other, "Session event"),
            }
        }
    })
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let value = line.trim();
    match (value.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        (true, None) => anyhow::bail!("{} is required", label),
        (false, _) => Ok(value.to_string()),
    }
}

async fn login(
    session: &SessionManager,
    config: &mut Config,
    args: CredentialsArgs,
    register: bool,
) -> Result<ExitCode> {
    let username = match args.username {
        Some(u) => u,
        None => prompt("Username", config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let result = if register {
        session.register(&username, &password).await
    } else {
        session.login(&username, &password).await
    };

    match result {
        Ok(credential) => {
            config.last_username = Some(credential.user.username.clone());
            config.save()?;
            println!("Logged in as {} ({}).", credential.user.username, credential.role);
            Ok(ExitCode::SUCCESS)
        }
        Err(ApiError::Unauthorized) | Err(ApiError::BadRequest(_)) if !register => {
            eprintln!("Invalid username or password.");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context(if register { "Registration failed" } else { "Login failed" }),
    }
}

async fn status(session: &SessionManager) -> ExitCode {
    match session.bootstrap().await {
        BootstrapOutcome::Valid(credential) => {
            println!("Logged in as {} ({}).", credential.user.username, credential.role);
            if let Some(remaining) = token::expires_in(&credential.token) {
                println!("Token expires in {} min.", remaining.num_minutes().max(0));
            }
            if credential.role.can_manage_recipes() {
                println!("Recipe management enabled.");
            }
            ExitCode::SUCCESS
        }
        BootstrapOutcome::Invalid(reason) => {
            if reason.is_expiry() {
                session.expire_session();
            } else {
                println!("Not logged in.");
            }
            ExitCode::FAILURE
        }
    }
}

async fn request(session: &SessionManager, args: RequestArgs) -> Result<ExitCode> {
    // Anonymous requests are fine for public endpoints; an expired session
    // is reported but does not block them.
    if let BootstrapOutcome::Invalid(reason) = session.bootstrap().await {
        if reason.is_expiry() {
            session.expire_session();
        }
        debug!(?reason, "Continuing without a session");
    }

    let client = session.client();
    let mut builder = client.request(args.method, &args.path);
    if let Some(data) = args.data {
        let body: serde_json::Value = serde_json::from_str(&data).context("--data is not valid JSON")?;
        builder = builder.json(&body);
    }

    let response = match client.send(builder).await {
        Ok(response) => response,
        Err(ApiError::SessionExpired) => return Ok(ExitCode::FAILURE),
        Err(e) => return Err(e).context("Request failed"),
    };

    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;
    eprintln!("{}", status);
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(if status.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
