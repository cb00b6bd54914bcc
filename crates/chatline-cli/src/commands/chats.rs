//! Conversation list handler

use anyhow::{Context, Result};

use chatline_core::sync::ConversationList;
use chatline_core::{Config, Session};

use super::authorized_client;
use crate::output::Output;

/// List conversations, most recent activity first
pub async fn list(config: &Config, session: &Session, output: &Output) -> Result<()> {
    let client = authorized_client(config, session)?;
    let conversations = client
        .fetch_conversations()
        .await
        .context("Failed to load conversations")?;

    let mut list = ConversationList::new();
    list.replace_all(conversations);

    output.print_conversations(list.as_slice());
    if !output.is_quiet() && !output.is_json() && list.total_unread() > 0 {
        println!("{} unread message(s)", list.total_unread());
    }

    Ok(())
}
