//! Server-originated commands. Only reachable with the per-boot command key.

use std::sync::Arc;

use relay_protocol::Payload;
use relay_server::{Category, Command, CommandInfo, Connection, RelayServer, presence};
use serde_json::Value;
use tracing::debug;

/// Presence cleanup for a closed socket.
pub struct Disconnect;

impl Command for Disconnect {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "disconnect",
            aliases: &[],
            category: Category::Internal,
            description: "Removes a closed socket from every channel it was in",
            usage: "",
            required: &["cmdKey"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        if payload.get("cmdKey").and_then(Value::as_str) != Some(server.cmd_key()) {
            return Ok(());
        }
        if let Some(identity) = presence::depart(server, conn) {
            debug!(client_id = %conn.id(), nick = %identity.nick, "Departed");
        }
        Ok(())
    }
}
