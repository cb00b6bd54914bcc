//! Interactive conversation handler
//!
//! Joins a conversation live: stdin lines are sent as messages and incoming
//! events are printed as they arrive.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use chatline_core::sync::{spawn_sync_task, SyncCommand};
use chatline_core::{Config, ConversationId, Session, SyncEvent, UserId};

use super::{authorized_client, require_session};
use crate::output::Output;

/// What a line typed by the user asks for
#[derive(Debug, PartialEq, Eq)]
enum InputAction {
    Send(String),
    TypingStart,
    TypingStop,
    Refresh,
    Quit,
    Ignore,
}

fn parse_input(line: &str) -> InputAction {
    let trimmed = line.trim();
    match trimmed {
        "" => InputAction::Ignore,
        "/quit" | "/q" | "/exit" => InputAction::Quit,
        "/typing" => InputAction::TypingStart,
        "/stop" => InputAction::TypingStop,
        "/chats" => InputAction::Refresh,
        _ => InputAction::Send(trimmed.to_string()),
    }
}

/// Run an interactive session in one conversation
pub async fn run(
    config: &Config,
    session: Session,
    id: ConversationId,
    output: &Output,
) -> Result<()> {
    require_session(&session)?;

    let mut handle = spawn_sync_task(config, session).context("Failed to start sync")?;
    handle.send(SyncCommand::RefreshConversations).await?;
    handle.send(SyncCommand::Connect(id)).await?;

    output.message("Type a message and press Enter. /typing, /stop, /chats, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                let command = match parse_input(&line) {
                    InputAction::Quit => break,
                    InputAction::Ignore => continue,
                    InputAction::Send(text) => SyncCommand::SendMessage(text),
                    InputAction::TypingStart => SyncCommand::TypingStart,
                    InputAction::TypingStop => SyncCommand::TypingStop,
                    InputAction::Refresh => SyncCommand::RefreshConversations,
                };
                handle.send(command).await?;
            }
            event = handle.event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                if event == SyncEvent::ConversationsUpdated && !output.is_json() {
                    continue;
                }
                output.print_event(&event);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    // The task may already be gone if its event channel closed
    let _ = handle.send(SyncCommand::Shutdown).await;
    output.message("Left the conversation.");
    Ok(())
}

/// Find or create the direct conversation with a user, then join it
pub async fn start(
    config: &Config,
    session: Session,
    user_id: UserId,
    output: &Output,
) -> Result<()> {
    if session.user_id() == Some(user_id) {
        bail!("Cannot start a conversation with yourself");
    }

    let client = authorized_client(config, &session)?;
    let direct = client
        .open_conversation_with(user_id)
        .await
        .with_context(|| format!("Failed to open a conversation with user {}", user_id))?;

    if direct.created {
        output.message(&format!("Started conversation {}", direct.conversation_id));
    }
    run(config, session, direct.conversation_id, output).await
}
