//! Command implementations for the CLI.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use concierge_core::{
    ApiResponse, Config, LoginError, LoginRequest, RequestDescriptor, SessionEvent,
    SessionManager, SessionStatus,
};

/// Default profile polling interval for `watch`
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;

pub async fn login(manager: &SessionManager, config: &mut Config, args: &[String]) -> Result<()> {
    let mut username = None;
    let mut totp = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--totp" => {
                let code = iter.next().ok_or_else(|| anyhow!("--totp requires a code"))?;
                totp = Some(code.clone());
            }
            other if username.is_none() => username = Some(other.to_string()),
            other => bail!("Unexpected argument: {}", other),
        }
    }

    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => prompt_line("Username: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", username))?;

    let mut request = LoginRequest::new(username.clone(), password);
    if let Some(code) = totp {
        request = request.with_totp(code);
    }

    let identity = match manager.login(request.clone()).await {
        Ok(identity) => identity,
        Err(LoginError::TwoFactorRequired) if request.totp_code.is_none() => {
            let code = prompt_line("Two-factor code: ")?;
            manager.login(request.with_totp(code)).await?
        }
        Err(e) => return Err(e.into()),
    };

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Signed in as {} (id {})", identity.username, identity.user_id);
    Ok(())
}

pub async fn logout(manager: &SessionManager) -> Result<()> {
    manager.logout().await;
    println!("Signed out");
    Ok(())
}

pub fn status(manager: &SessionManager, config: &Config) -> Result<()> {
    let session = manager.current();
    let report = json!({
        "status": session.status,
        "user_id": session.identity.as_ref().map(|i| i.user_id),
        "username": session.identity.as_ref().map(|i| i.username.as_str()),
        "base_url": config.base_url,
        "store": config.store,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn whoami(manager: &SessionManager) -> Result<()> {
    let identity = manager.refresh_identity().await?;
    println!("{} (id {})", identity.username, identity.user_id);
    Ok(())
}

pub async fn get(manager: &SessionManager, args: &[String]) -> Result<()> {
    let (path, params) = args
        .split_first()
        .ok_or_else(|| anyhow!("Usage: concierge get <path> [key=value ...]"))?;

    let mut descriptor = RequestDescriptor::get(path.as_str());
    for param in params {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("Query parameters must look like key=value: {}", param))?;
        descriptor = descriptor.with_query(key, value);
    }

    let response = manager.execute(&descriptor).await?;
    print_response(&response)
}

pub async fn post(manager: &SessionManager, args: &[String]) -> Result<()> {
    let [path, body] = args else {
        bail!("Usage: concierge post <path> <json>");
    };
    let body: Value = serde_json::from_str(body).context("Request body is not valid JSON")?;

    let descriptor = RequestDescriptor::post(path.as_str(), &body)?;
    let response = manager.execute(&descriptor).await?;
    print_response(&response)
}

/// Print session events as they happen, polling the profile so that token
/// expiry and refresh actually occur. Returns once the session ends.
pub async fn watch(manager: &SessionManager, args: &[String]) -> Result<()> {
    let interval_secs = match args.first() {
        Some(secs) => secs
            .parse()
            .with_context(|| format!("Invalid interval: {}", secs))?,
        None => DEFAULT_WATCH_INTERVAL_SECS,
    };

    if manager.current().status == SessionStatus::SignedOut {
        bail!("Not signed in - run `concierge login` first");
    }

    let mut events = manager.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(SessionEvent::SignedIn(identity)) => {
                    println!("signed in: {} (id {})", identity.username, identity.user_id);
                }
                Some(SessionEvent::RefreshFailed(reason)) => {
                    println!("refresh failed: {}", reason);
                }
                Some(SessionEvent::SignedOut { reason }) => {
                    println!("signed out: {:?}", reason);
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = ticker.tick() => {
                match manager.refresh_identity().await {
                    Ok(identity) => debug!(username = %identity.username, "Profile poll succeeded"),
                    Err(e) if e.is_transient() => println!("backend unavailable: {}", e),
                    Err(e) => debug!(error = %e, "Profile poll failed"),
                }
            }
        }
    }
}

fn print_response(response: &ApiResponse) -> Result<()> {
    match response.json::<Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("No input given");
    }
    Ok(line)
}
