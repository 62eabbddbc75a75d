//! Admin commands.

use std::sync::Arc;

use relay_protocol::Payload;
use relay_protocol::events::info as info_notice;
use relay_server::{Category, Command, CommandInfo, Connection, RelayServer};
use serde_json::Value;
use tracing::{info, warn};

use crate::{moderators, require_admin};

pub struct Reload;

impl Command for Reload {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "reload",
            aliases: &[],
            category: Category::Admin,
            description: "(Re)loads any new commands into memory, outputs errors if any",
            usage: "reload [reason]",
            required: &[],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        if !require_admin(server, conn) {
            return Ok(());
        }

        match server.reload() {
            Ok(count) => {
                let mut text = format!("Reloaded {count} commands");
                if let Some(reason) = payload.get("reason").and_then(Value::as_str) {
                    text.push_str(&format!(" with reason: {reason}"));
                }
                server.broadcast(info_notice(text), &moderators());
                info!(client_id = %conn.id(), commands = count, "Commands reloaded");
            }
            Err(e) => {
                warn!(client_id = %conn.id(), error = %e, "Reload failed");
                server.warn(conn, format!("Reload failed, previous commands kept: {e}"));
            }
        }
        Ok(())
    }
}
