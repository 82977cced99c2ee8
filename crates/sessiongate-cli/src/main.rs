//! sessiongate - inspect and exercise the persisted API session.
//!
//! Usage:
//!   sessiongate status
//!   sessiongate login <user-id> <display-name> <access-token> [refresh-token]
//!   sessiongate get <url>
//!   sessiongate logout

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use sessiongate_core::{AccessToken, ApiRequest, Config, Identity, RefreshToken, RequestGateway};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix inside `log_dir`
const LOG_FILE_PREFIX: &str = "sessiongate.log";

/// Role recorded for sessions stored from the command line
const CLI_ROLE: &str = "user";

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer guard, which must be kept alive for buffered
/// log lines to be flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  sessiongate status");
    eprintln!("  sessiongate login <user-id> <display-name> <access-token> [refresh-token]");
    eprintln!("  sessiongate get <url>");
    eprintln!("  sessiongate logout");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()
        .context("Failed to load configuration")?
        .with_env_overrides();
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        return Ok(());
    };

    if !config.persist_session {
        eprintln!("Warning: persist_session is disabled, nothing survives this process");
    }

    let gateway = RequestGateway::from_config(&config)?;
    info!(command = %command, "sessiongate starting");

    let result = match command.as_str() {
        "status" => status(&gateway),
        "login" => login(&gateway, &config, &args[1..]),
        "get" => get(&gateway, &args[1..]).await,
        "logout" => {
            if gateway.coordinator().logout() {
                println!("Logged out");
            } else {
                println!("No active session");
            }
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    };

    // Session writes happen in the background; finish them before exit
    gateway.coordinator().flush().await;
    result
}

fn status(gateway: &RequestGateway) -> Result<()> {
    let snapshot = gateway.coordinator().snapshot();
    let output = serde_json::json!({
        "phase": snapshot.phase.as_str(),
        "identity": snapshot.identity,
        "canRefresh": snapshot.can_refresh,
        "authenticatedAt": snapshot.authenticated_at,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn login(gateway: &RequestGateway, config: &Config, args: &[String]) -> Result<()> {
    let [user_id, display_name, access, rest @ ..] = args else {
        print_usage();
        return Ok(());
    };
    let refresh = rest.first().map(RefreshToken::new);
    if refresh.is_some() && !config.keeps_refresh_credential() {
        eprintln!(
            "Warning: the refresh token is not kept after this process exits; \
             enable persist_session and persist_refresh_credential to keep it"
        );
    }

    gateway.coordinator().login(
        AccessToken::new(access.as_str()),
        refresh,
        Identity::new(user_id.as_str(), CLI_ROLE, display_name.as_str()),
    )?;
    println!("Session stored for {}", display_name);
    Ok(())
}

async fn get(gateway: &RequestGateway, args: &[String]) -> Result<()> {
    let Some(url) = args.first() else {
        print_usage();
        return Ok(());
    };

    let response = gateway.execute(&ApiRequest::get(url.as_str())).await?;
    println!("{}", response.status());
    println!("{}", response.text());
    Ok(())
}
