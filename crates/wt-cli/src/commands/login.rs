//! Login command.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use wt_api::{AuthStatus, CollectorClient, Credentials, TokenManager};

use crate::{Config, open_store};

/// Environment variable holding the password.
pub const PASSWORD_ENV: &str = "WT_PASSWORD";

/// Picks the password from the environment, else from the first input line.
pub fn read_password<R: BufRead>(from_env: Option<String>, mut reader: R) -> Result<String> {
    if let Some(password) = from_env.filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        bail!("no password given; set {PASSWORD_ENV} or pipe it on stdin");
    }
    Ok(password.to_string())
}

pub async fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    email: &str,
    password: String,
) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let collector = Arc::new(
        CollectorClient::new(config.api_base_url.clone(), config.request_timeout())
            .context("failed to build collector client")?,
    );
    let tokens = TokenManager::new(collector, store, config.refresh_buffer());
    let credentials = Credentials {
        email: email.to_string(),
        password,
    };
    let status = tokens
        .login(&credentials, Utc::now())
        .await
        .with_context(|| format!("login to {} failed", config.api_base_url))?;

    if let AuthStatus::Authenticated {
        user_email,
        expires_at,
    } = status
    {
        writeln!(writer, "Logged in as {user_email}")?;
        writeln!(writer, "Access token valid until {}", expires_at.to_rfc3339())?;
    }
    Ok(())
}
