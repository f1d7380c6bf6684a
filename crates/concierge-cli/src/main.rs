//! Concierge CLI - command-line access to the hotel backend.
//!
//! Drives the session manager the way a UI would: sign in once, then issue
//! requests that transparently survive access-token expiry.

mod commands;

use std::io;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use concierge_core::{Config, SessionManager};

const USAGE: &str = "\
Usage: concierge <command> [args]

Commands:
  login [username] [--totp CODE]   Sign in (password is prompted)
  logout                           Sign out and revoke the refresh token
  status                           Show the current session
  whoami                           Fetch the signed-in user's profile
  get <path> [key=value ...]       Authenticated GET
  post <path> <json>               Authenticated POST with a JSON body
  watch [interval_secs]            Print session events while polling the profile

Environment:
  CONCIERGE_BASE_URL     Backend base URL
  CONCIERGE_STORE        Credential store: keyring | file
  CONCIERGE_PASSPHRASE   Passphrase for the file store
  RUST_LOG               Log filter (default: warn)";

/// Log file name prefix inside `log_dir`
const LOG_FILE_PREFIX: &str = "concierge.log";

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(name) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if name == "help" || name == "--help" || name == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }
    let command: Command = match name.parse() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", USAGE);
            return Err(e);
        }
    };

    let mut config = Config::load()?;
    config.apply_env()?;

    // Hold the guard so buffered file logs are flushed on exit
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(base_url = %config.base_url, store = ?config.store, ?command, "Concierge starting");

    let manager = SessionManager::from_config(&config)?;
    let rest = &args[1..];

    match command {
        Command::Login => commands::login(&manager, &mut config, rest).await,
        Command::Logout => commands::logout(&manager).await,
        Command::Status => commands::status(&manager, &config),
        Command::Whoami => commands::whoami(&manager).await,
        Command::Get => commands::get(&manager, rest).await,
        Command::Post => commands::post(&manager, rest).await,
        Command::Watch => commands::watch(&manager, rest).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    Logout,
    Status,
    Whoami,
    Get,
    Post,
    Watch,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "login" => Ok(Command::Login),
            "logout" => Ok(Command::Logout),
            "status" => Ok(Command::Status),
            "whoami" => Ok(Command::Whoami),
            "get" => Ok(Command::Get),
            "post" => Ok(Command::Post),
            "watch" => Ok(Command::Watch),
            other => Err(anyhow::anyhow!("Unknown command: {}", other)),
        }
    }
}
