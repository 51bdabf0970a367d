//! storefront-chat: terminal client for the storefront support chat

mod config;
mod diagnostics;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use storefront_chat_sync::{
    AttachmentUpload, ChannelState, ChatSession, Conversation, ErrorNotice, InboundEvent, Message,
    SendOutcome, StaticTokenProvider, StoreChange, TokenProvider,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::diagnostics::{ChatCommand, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let ChatCommand::DumpConfig = cli.command {
        let mut shown = config.clone();
        if shown.auth.token.is_some() {
            shown.auth.token = Some("<redacted>".to_string());
        }
        println!(
            "{}",
            toml::to_string_pretty(&shown).context("Failed to serialize config")?
        );
        return Ok(());
    }

    let tokens: Arc<dyn TokenProvider> = match config.token() {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => {
            warn!(
                "No session token; set {} or [auth] token",
                config::TOKEN_ENV_VAR
            );
            Arc::new(StaticTokenProvider::signed_out())
        }
    };
    let session = ChatSession::with_defaults(config.chat.clone(), tokens)
        .context("Failed to create chat session")?;
    let output = Output { json: cli.json };

    let result = run(&session, cli.command, &output).await;
    session.disconnect().await;
    result
}

async fn run(session: &ChatSession, command: ChatCommand, output: &Output) -> Result<()> {
    let dispatcher = session.dispatcher();

    match command {
        ChatCommand::Conversations => {
            let mut raised = session.errors().subscribe();
            loaded(&mut raised, dispatcher.load_conversations().await)?;
            output.conversations(&dispatcher.conversations().await)?;
            output.line(&format!("unread: {}", dispatcher.total_unread().await));
        }

        ChatCommand::History {
            conversation_id,
            page,
        } => {
            let mut raised = session.errors().subscribe();
            loaded(&mut raised, dispatcher.load_messages(&conversation_id, page).await)?;
            output.messages(&dispatcher.messages(&conversation_id).await)?;
        }

        ChatCommand::Send {
            conversation_id,
            text,
            attachments,
        } => {
            connect_quietly(session).await;
            dispatcher.load_conversations().await;
            dispatcher.select_conversation(&conversation_id).await?;

            match dispatcher
                .send_message(&text, attachments)
                .await
                .context("Failed to send message")?
            {
                SendOutcome::Emitted => output.line("sent over channel"),
                SendOutcome::Delivered(message) => output.messages(&[message])?,
            }
        }

        ChatCommand::New {
            subject,
            text,
            receiver,
        } => {
            let created = dispatcher
                .create_new_conversation(&subject, &text, receiver)
                .await
                .context("Failed to create conversation")?;
            output.messages(&[created])?;
        }

        ChatCommand::Read { conversation_id } => {
            connect_quietly(session).await;
            dispatcher.load_conversations().await;

            let mut raised = session.errors().subscribe();
            dispatcher.mark_as_read(&conversation_id).await?;
            if let Some(notice) = raised_since(&mut raised) {
                return Err(anyhow!("Read receipt not confirmed: {}", notice.message));
            }
            output.line(&format!("unread: {}", dispatcher.total_unread().await));
        }

        ChatCommand::Upload { path } => {
            let upload = AttachmentUpload::from_path(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let url = dispatcher
                .upload_attachment(upload)
                .await
                .context("Failed to upload attachment")?;
            output.line(&url);
        }

        ChatCommand::Listen { conversation } => listen(session, conversation, output).await?,

        ChatCommand::DumpConfig => {}
    }

    Ok(())
}

/// Stay connected, printing messages and state changes until Ctrl-C
async fn listen(
    session: &ChatSession,
    conversation: Option<String>,
    output: &Output,
) -> Result<()> {
    let json = output.json;
    session
        .channel()
        .on("newMessage", move |event| {
            if let InboundEvent::NewMessage(message) = event {
                print_message(message, json);
            }
        })
        .await;
    session
        .subscribe(Arc::new(|change: &StoreChange| match change {
            StoreChange::ChannelState(state) => eprintln!("-- channel {}", state),
            StoreChange::UnreadChanged { total } => eprintln!("-- unread {}", total),
            StoreChange::Presence { joined, notice } => eprintln!(
                "-- {} {}",
                notice.user_name,
                if *joined { "joined" } else { "left" }
            ),
            StoreChange::Error(notice) => {
                eprintln!("-- {} error: {}", notice.category, notice.message)
            }
            _ => {}
        }))
        .await;

    session.connect().await.context("Failed to connect")?;
    session.dispatcher().load_conversations().await;
    if let Some(conversation_id) = conversation {
        session
            .dispatcher()
            .select_conversation(&conversation_id)
            .await?;
        session.dispatcher().load_messages(&conversation_id, 1).await;
        output.messages(&session.dispatcher().messages(&conversation_id).await)?;
    }

    info!("Listening; press Ctrl-C to stop");
    let mut state = session.channel().watch_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow();
                if current == ChannelState::Disconnected {
                    if let Some(notice) = session.errors().current() {
                        return Err(anyhow!("Channel closed: {}", notice.message));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Connect for the duration of a command; fallback-only is fine
async fn connect_quietly(session: &ChatSession) {
    if let Err(e) = session.connect().await {
        warn!("Continuing without channel: {}", e);
    }
}

/// Error raised after `watcher` was taken, ignoring older ones
fn raised_since(watcher: &mut watch::Receiver<Option<ErrorNotice>>) -> Option<ErrorNotice> {
    match watcher.has_changed() {
        Ok(true) => watcher.borrow_and_update().clone(),
        _ => None,
    }
}

fn loaded(watcher: &mut watch::Receiver<Option<ErrorNotice>>, ok: bool) -> Result<()> {
    if ok {
        return Ok(());
    }
    let reason = raised_since(watcher)
        .map(|notice| notice.message)
        .unwrap_or_else(|| "unknown error".to_string());
    Err(anyhow!("Request failed: {}", reason))
}

fn print_message(message: &Message, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(message) {
            println!("{}", line);
        }
        return;
    }

    let marker = if message.is_read { ' ' } else { '*' };
    println!(
        "{}{} [{:?}] {}: {}",
        marker,
        message.created_at.format("%Y-%m-%d %H:%M"),
        message.sender_type,
        message.sender_id,
        message.content
    );
    for attachment in &message.attachments {
        println!("      attachment: {}", attachment);
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn line(&self, text: &str) {
        if !self.json {
            println!("{}", text);
        }
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize output")?
        );
        Ok(())
    }

    fn conversations(&self, conversations: &[Conversation]) -> Result<()> {
        if self.json {
            return self.print_json(conversations);
        }
        for conversation in conversations {
            println!(
                "{:<24} {:>3} {:<8?} {}",
                conversation.id,
                conversation.unread_count,
                conversation.status,
                conversation.subject
            );
        }
        Ok(())
    }

    fn messages(&self, messages: &[Message]) -> Result<()> {
        if self.json {
            return self.print_json(messages);
        }
        for message in messages {
            print_message(message, false);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_chat_sync::{ChatError, ErrorSignal};

    #[test]
    fn test_earlier_error_is_not_reported() {
        let errors = ErrorSignal::new();
        errors.raise(&ChatError::Transport("connection refused".to_string()));

        let mut raised = errors.subscribe();
        assert!(raised_since(&mut raised).is_none());
        assert!(loaded(&mut raised, true).is_ok());

        let failure = loaded(&mut raised, false).unwrap_err();
        assert_eq!(failure.to_string(), "Request failed: unknown error");
    }

    #[test]
    fn test_new_error_is_reported_once() {
        let errors = ErrorSignal::new();
        let mut raised = errors.subscribe();

        errors.raise(&ChatError::Request("mark read rejected".to_string()));
        let notice = raised_since(&mut raised).unwrap();
        assert_eq!(notice.message, "Request failed: mark read rejected");
        assert!(raised_since(&mut raised).is_none());

        // The same error raised again still counts as new
        errors.raise(&ChatError::Request("mark read rejected".to_string()));
        let failure = loaded(&mut raised, false).unwrap_err();
        assert!(failure.to_string().contains("mark read rejected"));
    }
}
