//! `session`: restore from a token, or issue a fresh one.

use std::sync::Arc;

use relay_protocol::Payload;
use relay_server::session::{failure_payload, issued_payload, restore};
use relay_server::{Category, Command, CommandInfo, Connection, RelayServer};
use serde_json::Value;

pub struct Session;

impl Command for Session {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "session",
            aliases: &[],
            category: Category::Core,
            description: "Restore a previous session, or request a token for the current one",
            usage: "session [token]",
            required: &[],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        let token = payload.get("token").and_then(Value::as_str);

        match (token, conn.identity()) {
            (Some(token), None) => {
                restore(server, conn, token);
            }
            (None, Some(identity)) => match server.sessions().issue(conn) {
                Some(token) => server.reply(conn, issued_payload(token, &identity.channels)),
                None => server.reply(conn, failure_payload()),
            },
            _ => server.reply(conn, failure_payload()),
        }
        Ok(())
    }
}
