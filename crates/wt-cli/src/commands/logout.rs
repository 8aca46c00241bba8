//! Logout command.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use wt_api::{CollectorClient, TokenManager};

use crate::{Config, open_store};

pub async fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let collector = Arc::new(
        CollectorClient::new(config.api_base_url.clone(), config.request_timeout())
            .context("failed to build collector client")?,
    );
    let tokens = TokenManager::new(collector, store, config.refresh_buffer());
    if !tokens.is_authenticated() {
        writeln!(writer, "Not logged in.")?;
        return Ok(());
    }
    tokens.logout().await;
    writeln!(writer, "Logged out.")?;
    Ok(())
}
