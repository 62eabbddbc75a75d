//! `chat`: send a message to the active channel.

use std::sync::Arc;

use relay_protocol::{Events, Payload};
use relay_server::{Category, Command, CommandInfo, Connection, Filter, Hook, HookAction, RelayServer};
use serde_json::{Value, json};

/// Characters per extra rate-limit point.
const CHARS_PER_POINT: f64 = 83.0 * 4.0;

pub const TOO_MUCH_TEXT: &str = "You are sending too much text. Wait a moment and try again.\n\
Press the up arrow key to restore your last message.";

pub struct Chat;

impl Command for Chat {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "chat",
            aliases: &["msg"],
            category: Category::Core,
            description: "Broadcasts passed `text` field to the calling users channel",
            usage: "chat {text}",
            required: &["text"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        let Some(identity) = conn.identity() else {
            return Ok(());
        };
        let Some(text) = message_text(&payload) else {
            return Ok(());
        };

        let score = 1.0 + text.len() as f64 / CHARS_PER_POINT;
        if server.police().frisk(conn.address(), score) {
            server.warn(conn, TOO_MUCH_TEXT);
            return Ok(());
        }

        let mut message = identity.details();
        message.insert("cmd".into(), json!(Events::CHAT));
        message.insert("text".into(), json!(text));
        message.insert("channel".into(), json!(identity.channel));
        server.broadcast(message, &Filter::in_channel(&identity.channel));
        Ok(())
    }

    fn hooks(&self) -> Vec<Hook> {
        vec![
            Hook::inbound("chat", 20, my_hash),
            Hook::inbound("chat", 254, unknown_slash_command),
        ]
    }
}

/// Trimmed, non-empty message text.
pub fn message_text(payload: &Payload) -> Option<&str> {
    payload
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `/myhash` replies with the caller's hash instead of chatting.
fn my_hash(server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<HookAction> {
    if message_text(&payload) != Some("/myhash") {
        return Ok(HookAction::Continue(payload));
    }
    if let Some(identity) = conn.identity() {
        server.info(conn, format!("Your hash: {}", identity.hash));
    }
    Ok(HookAction::Veto)
}

/// Anything still looking like a slash command at this point is unknown.
fn unknown_slash_command(
    server: &RelayServer,
    conn: &Arc<Connection>,
    payload: Payload,
) -> anyhow::Result<HookAction> {
    let Some(word) = message_text(&payload)
        .and_then(|t| t.strip_prefix('/'))
        .filter(|rest| rest.starts_with(char::is_alphabetic))
        .and_then(|rest| rest.split_whitespace().next())
    else {
        return Ok(HookAction::Continue(payload));
    };
    server.warn(conn, format!("Unknown chat command: /{word}"));
    Ok(HookAction::Veto)
}
