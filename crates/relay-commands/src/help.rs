//! `help`: list commands or describe one.

use std::sync::Arc;

use relay_protocol::Payload;
use relay_server::{Category, Command, CommandInfo, Connection, RelayServer};
use serde_json::Value;

pub struct Help;

impl Command for Help {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "help",
            aliases: &["h"],
            category: Category::Core,
            description: "Outputs information about the servers current protocol",
            usage: "help [command]",
            required: &[],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        let text = match payload.get("command").and_then(Value::as_str) {
            Some(name) => match server.commands().get(name.trim()) {
                Some(info) if info.category != Category::Internal => describe(&info),
                _ => format!("No help for `{}`", name.trim()),
            },
            None => listing(server),
        };
        server.info(conn, text);
        Ok(())
    }
}

fn describe(info: &CommandInfo) -> String {
    let mut text = format!("# {}\n{}\nUsage: {}", info.name, info.description, info.usage);
    if !info.aliases.is_empty() {
        text.push_str(&format!("\nAliases: {}", info.aliases.join(", ")));
    }
    text
}

fn listing(server: &RelayServer) -> String {
    let mut text = String::from("# All commands:");
    for (category, names) in server.commands().categories() {
        if category == Category::Internal {
            continue;
        }
        text.push_str(&format!("\n{}: {}", category.as_str(), names.join(", ")));
    }
    text.push_str("\n---\nFor specific help on certain commands, use `help <command>`");
    text
}
