//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use chatline_core::{Conversation, Message, SyncEvent, TypingUser, User};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Check if output is JSON
    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print the signed-in user
    pub fn print_user(&self, user: &User) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:    {}", user.id);
                println!("Name:  {}", user.display_name());
                println!("Email: {}", user.email);
            }
            OutputFormat::Json => print_json(user),
            OutputFormat::Quiet => println!("{}", user.id),
        }
    }

    /// Print users from the directory or a search
    pub fn print_users(&self, users: &[User]) {
        match self.format {
            OutputFormat::Human => {
                if users.is_empty() {
                    println!("No users found.");
                    return;
                }
                for user in users {
                    println!("{}", user_row(user));
                }
            }
            OutputFormat::Json => print_json(&users),
            OutputFormat::Quiet => {
                for user in users {
                    println!("{}", user.id);
                }
            }
        }
    }

    /// Print the conversation list, newest activity first
    pub fn print_conversations(&self, conversations: &[Conversation]) {
        match self.format {
            OutputFormat::Human => {
                if conversations.is_empty() {
                    println!("No conversations found.");
                    return;
                }
                for conv in conversations {
                    let unread = if conv.unread_count > 0 {
                        format!(" ({} unread)", conv.unread_count)
                    } else {
                        String::new()
                    };
                    println!(
                        "{:>5} | {}{} | {} | {}",
                        conv.id,
                        truncate(&conv.title(), 25),
                        unread,
                        truncate(conv.last_message.as_deref().unwrap_or("No messages yet"), 40),
                        format_time(conv.last_message_time)
                    );
                }
                println!("\n{} conversation(s)", conversations.len());
            }
            OutputFormat::Json => print_json(&conversations),
            OutputFormat::Quiet => {
                for conv in conversations {
                    println!("{}", conv.id);
                }
            }
        }
    }

    /// Print a list of messages
    pub fn print_messages(&self, messages: &[Message]) {
        match self.format {
            OutputFormat::Human => {
                if messages.is_empty() {
                    println!("No messages yet.");
                    return;
                }
                for message in messages {
                    println!("{}", message_line(message));
                }
            }
            OutputFormat::Json => print_json(&messages),
            OutputFormat::Quiet => {
                for message in messages {
                    println!("{}", message.text);
                }
            }
        }
    }

    /// Print an event from a live session
    pub fn print_event(&self, event: &SyncEvent) {
        match self.format {
            OutputFormat::Human => match event {
                SyncEvent::ConnectionChanged {
                    conversation,
                    connected,
                } => match (conversation, connected) {
                    (Some(id), true) => println!("── connected to conversation {} ──", id),
                    (Some(id), false) => {
                        println!("── connecting to conversation {}... ──", id)
                    }
                    (None, _) => println!("── disconnected ──"),
                },
                SyncEvent::MessageReceived(message) => println!("{}", message_line(message)),
                SyncEvent::HistoryLoaded { added, .. } if *added > 0 => {
                    println!("── loaded {} earlier message(s) ──", added)
                }
                SyncEvent::TypingChanged(users) => {
                    if let Some(line) = typing_line(users) {
                        println!("   {}", line);
                    }
                }
                SyncEvent::Error(msg) => eprintln!("✗ {}", msg),
                _ => {}
            },
            OutputFormat::Json => {
                let value = match event {
                    SyncEvent::ConnectionChanged {
                        conversation,
                        connected,
                    } => serde_json::json!({
                        "event": "connection",
                        "conversation": conversation,
                        "connected": connected
                    }),
                    SyncEvent::MessageReceived(message) => {
                        serde_json::json!({"event": "message", "message": message})
                    }
                    SyncEvent::HistoryLoaded {
                        conversation,
                        added,
                    } => serde_json::json!({
                        "event": "history",
                        "conversation": conversation,
                        "added": added
                    }),
                    SyncEvent::TypingChanged(users) => {
                        serde_json::json!({"event": "typing", "users": users})
                    }
                    SyncEvent::MessagesRead => serde_json::json!({"event": "read"}),
                    SyncEvent::ConversationsUpdated => {
                        serde_json::json!({"event": "conversations"})
                    }
                    SyncEvent::Error(msg) => serde_json::json!({"event": "error", "message": msg}),
                };
                println!("{}", value);
            }
            OutputFormat::Quiet => {
                if let SyncEvent::MessageReceived(message) = event {
                    println!("{}", message.text);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// One directory row: `    2 | Bob Jones | bob@example.com`
fn user_row(user: &User) -> String {
    format!(
        "{:>5} | {} | {}",
        user.id,
        truncate(&user.display_name(), 25),
        user.email
    )
}

/// One chat line: `[14:02] Bob: hello`, with a marker for own messages
fn message_line(message: &Message) -> String {
    let time = message
        .sent_at
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let read = if message.is_sent_by_me && message.is_read {
        " ✓"
    } else {
        ""
    };
    let sender = if message.is_sent_by_me {
        "you"
    } else {
        message.sender_name.as_str()
    };
    format!("[{}] {}: {}{}", time, sender, message.text, read)
}

/// Status line for peers currently typing
fn typing_line(users: &[TypingUser]) -> Option<String> {
    match users {
        [] => None,
        [one] => Some(format!("{} is typing...", one.name)),
        [first, second] => Some(format!("{} and {} are typing...", first.name, second.name)),
        [first, rest @ ..] => Some(format!(
            "{} and {} others are typing...",
            first.name,
            rest.len()
        )),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
