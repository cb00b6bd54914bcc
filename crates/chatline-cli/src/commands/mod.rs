//! Command handlers

pub mod auth;
pub mod chats;
pub mod config;
pub mod history;
pub mod open;
pub mod users;

use anyhow::{bail, Result};

use chatline_core::{ApiClient, Config, Session};

const NOT_SIGNED_IN: &str = "Not signed in. Run `chatline login <email>` first.";

/// Fail early with a hint when no session is stored
fn require_session(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        bail!(NOT_SIGNED_IN);
    }
    Ok(())
}

/// REST client carrying the stored token
fn authorized_client(config: &Config, session: &Session) -> Result<ApiClient> {
    let client = ApiClient::new(config, session.token().map(str::to_string))?;
    if !client.has_token() {
        bail!(NOT_SIGNED_IN);
    }
    Ok(client)
}
