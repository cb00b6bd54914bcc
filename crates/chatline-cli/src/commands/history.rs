//! Message history handler

use anyhow::{Context, Result};

use chatline_core::sync::SeenMessages;
use chatline_core::{Config, ConversationId, Message, Session};

use super::authorized_client;
use crate::output::Output;

/// Print the stored history of a conversation
pub async fn show(
    config: &Config,
    session: &Session,
    id: ConversationId,
    output: &Output,
) -> Result<()> {
    let client = authorized_client(config, session)?;
    let records = client
        .fetch_messages(id)
        .await
        .with_context(|| format!("Failed to load messages for conversation {}", id))?;

    let mut seen = SeenMessages::new();
    let messages: Vec<Message> = records
        .into_iter()
        .filter(|record| seen.insert(record.key()))
        .map(|record| record.into_message(id, session.user_id()))
        .collect();

    output.print_messages(&messages);
    Ok(())
}
