//! Command line and logging setup

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Storefront support-chat command-line client
#[derive(Parser, Debug)]
#[command(name = "storefront-chat")]
#[command(about = "Talk to the storefront support chat from a terminal", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub timestamps: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: ChatCommand,
}

/// Chat operations
#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    /// Stay connected and print every change until interrupted
    Listen {
        /// Conversation to open while listening
        #[arg(long)]
        conversation: Option<String>,
    },

    /// List conversations with their unread counts
    Conversations,

    /// Show one page of a conversation's history
    History {
        /// Conversation id
        conversation_id: String,

        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Send a message to a conversation
    Send {
        /// Conversation id
        conversation_id: String,

        /// Message text
        text: String,

        /// Attachment URLs (see `upload`)
        #[arg(short, long = "attach", value_name = "URL")]
        attachments: Vec<String>,
    },

    /// Start a new conversation
    New {
        /// Subject line
        subject: String,

        /// First message
        text: String,

        /// User id of the intended recipient
        #[arg(long)]
        receiver: Option<String>,
    },

    /// Mark every message of a conversation read
    Read {
        /// Conversation id
        conversation_id: String,
    },

    /// Upload a file and print its attachment URL
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// Show the effective configuration
    DumpConfig,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    // logs go to stderr so command output stays pipeable
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "storefront-chat",
            "--log-level",
            "debug",
            "send",
            "c1",
            "hello there",
            "--attach",
            "https://cdn.example/a.png",
        ])
        .unwrap();

        assert_eq!(cli.log_level, "debug");
        assert!(cli.timestamps);
        match cli.command {
            ChatCommand::Send {
                conversation_id,
                text,
                attachments,
            } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(text, "hello there");
                assert_eq!(attachments, vec!["https://cdn.example/a.png"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_defaults() {
        let cli = Cli::try_parse_from(["storefront-chat", "--timestamps", "false", "history", "c1"])
            .unwrap();
        assert!(!cli.timestamps);
        assert!(matches!(
            cli.command,
            ChatCommand::History { page: 1, .. }
        ));
    }
}
