//! Chatline CLI
//!
//! Command-line interface for Chatline - realtime one-to-one chat.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatline_core::{Config, ConversationId, Session, UserId};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "chatline")]
#[command(about = "Chatline - realtime chat from the terminal")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and sign in with it
    Register {
        /// Account email
        email: String,
        /// First name
        #[arg(long, default_value = "")]
        first_name: String,
        /// Last name
        #[arg(long, default_value = "")]
        last_name: String,
        /// Password (prompted for if not given)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Sign in and store the session
    Login {
        /// Account email
        email: String,
        /// Password (prompted for if not given)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List conversations, most recent first
    #[command(alias = "ls")]
    Chats,
    /// Print the message history of a conversation
    History {
        /// Conversation ID
        id: ConversationId,
    },
    /// Join a conversation live (type to send, /quit to leave)
    Open {
        /// Conversation ID
        id: ConversationId,
    },
    /// List other users, or search them by name or email
    Users {
        /// Search text (matches email, first name, or last name)
        #[arg(short, long)]
        search: Option<String>,
        /// Directory page to show
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
    },
    /// Open the one-to-one conversation with a user, creating it if needed
    Start {
        /// User ID (see `chatline users`)
        user_id: UserId,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, api_url, ws_url, typing_timeout_ms,
        /// request_timeout_secs, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work on the file directly
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    let interactive = matches!(cli.command, Commands::Open { .. } | Commands::Start { .. });
    init_logging(&config, interactive);

    let session_path = config.session_path();
    let session = Session::load(&session_path)?;

    match cli.command {
        Commands::Register {
            email,
            first_name,
            last_name,
            password,
        } => {
            commands::auth::register(&config, email, first_name, last_name, password, &output)
                .await
        }
        Commands::Login { email, password } => {
            commands::auth::login(&config, email, password, &output).await
        }
        Commands::Logout => commands::auth::logout(&config, &output),
        Commands::Whoami => commands::auth::whoami(&session, &output),
        Commands::Chats => commands::chats::list(&config, &session, &output).await,
        Commands::History { id } => commands::history::show(&config, &session, id, &output).await,
        Commands::Open { id } => commands::open::run(&config, session, id, &output).await,
        Commands::Users { search, page } => {
            commands::users::list(&config, &session, page, search, &output).await
        }
        Commands::Start { user_id } => {
            commands::open::start(&config, session, user_id, &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// Initialize logging when CHATLINE_LOG is set
///
/// Interactive sessions log to a file so the chat stays readable; other
/// commands log to stderr.
fn init_logging(config: &Config, interactive: bool) {
    let Ok(log_level) = std::env::var("CHATLINE_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "chatline_core={},chatline_cli={}",
        log_level, log_level
    ));

    if !interactive {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    }

    let log_path = config.log_path();
    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_directory_commands_parse() {
        let cli = Cli::try_parse_from(["chatline", "users", "--search", "bob"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Users { search: Some(ref q), page: 1 } if q == "bob"
        ));

        // Pages start at 1
        assert!(Cli::try_parse_from(["chatline", "users", "--page", "0"]).is_err());

        let cli = Cli::try_parse_from(["chatline", "start", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Start { user_id: 7 }));

        let cli = Cli::try_parse_from([
            "chatline",
            "register",
            "ada@example.com",
            "--first-name",
            "Ada",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Register { ref first_name, password: None, .. } if first_name == "Ada"
        ));
    }
}
