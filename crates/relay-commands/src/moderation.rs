//! Moderator commands: `ban`, `unban`, `muzzle`, `speak`.

use std::sync::Arc;

use relay_protocol::events::event;
use relay_protocol::{Events, Payload};
use relay_server::{
    Category, Command, CommandInfo, Connection, Filter, Hook, HookAction, Identity, RelayServer,
};
use serde_json::{Value, json};
use tracing::info;

use crate::chat::message_text;
use crate::{moderators, require_moderator};

pub const USER_NOT_FOUND: &str = "Could not find user in channel";
pub const SAME_LEVEL: &str = "This trick wont work on users of the same level";

/// The caller's identity plus every connection in its channel holding `nick`.
///
/// Replies and returns `None` when nothing actionable was found.
fn resolve_targets(
    server: &RelayServer,
    conn: &Arc<Connection>,
    payload: &Payload,
) -> Option<(Identity, String, Vec<Arc<Connection>>)> {
    let caller = conn.identity()?;
    let nick = payload
        .get("nick")
        .and_then(Value::as_str)
        .map(|n| n.trim().trim_start_matches('@').to_string())
        .unwrap_or_default();

    let targets = server.find_sockets(&Filter::in_channel(&caller.channel).eq("nick", nick.as_str()));
    if targets.is_empty() {
        server.warn(conn, USER_NOT_FOUND);
        return None;
    }
    if targets.iter().any(|t| t.level() >= caller.level) {
        server.deny(conn, SAME_LEVEL);
        return None;
    }
    Some((caller, nick, targets))
}

fn tell_moderators(server: &RelayServer, text: String) {
    server.broadcast(relay_protocol::events::info(text), &moderators());
}

// ── ban ─────────────────────────────────────────────────────────────────

pub struct Ban;

impl Command for Ban {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "ban",
            aliases: &[],
            category: Category::Moderator,
            description: "Disconnects the target nickname in the same channel as calling socket & adds to ratelimiter",
            usage: "ban {nick}",
            required: &["nick"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        if !require_moderator(server, conn) {
            return Ok(());
        }
        let Some((caller, nick, targets)) = resolve_targets(server, conn, &payload) else {
            return Ok(());
        };

        let mut hashes = Vec::with_capacity(targets.len());
        for target in &targets {
            let hash = target.identity().map(|i| i.hash).unwrap_or_default();
            server.police().arrest(target.address(), &hash);
            hashes.push(hash);
        }

        server.broadcast(
            relay_protocol::events::info(format!("Banned {nick}")),
            &Filter::in_channel(&caller.channel),
        );
        tell_moderators(
            server,
            format!(
                "{} banned {} in {}, userhash: {}",
                caller.nick,
                nick,
                caller.channel,
                hashes.join(", ")
            ),
        );

        for target in &targets {
            target.socket().close();
        }
        info!(moderator = %caller.nick, target = %nick, channel = %caller.channel, "Banned");
        Ok(())
    }
}

// ── unban ───────────────────────────────────────────────────────────────

pub struct Unban;

impl Command for Unban {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "unban",
            aliases: &[],
            category: Category::Moderator,
            description: "Removes target ip or hash from the ratelimiter",
            usage: "unban {hash} | unban {ip}",
            required: &[],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        if !require_moderator(server, conn) {
            return Ok(());
        }
        let Some(caller) = conn.identity() else {
            return Ok(());
        };

        let Some(target) = ["hash", "ip"]
            .iter()
            .find_map(|field| payload.get(*field).and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            server.warn(conn, "hash:'targethash' or ip:'1.2.3.4' is required");
            return Ok(());
        };

        if !server.police().pardon(target) {
            server.warn(conn, format!("No ban found for {target}"));
            return Ok(());
        }

        server.info(conn, format!("Unbanned {target}"));
        tell_moderators(server, format!("{} unbanned: {}", caller.nick, target));
        info!(moderator = %caller.nick, target = %target, "Unbanned");
        Ok(())
    }
}

// ── muzzle / speak ──────────────────────────────────────────────────────

fn set_muzzled(server: &RelayServer, conn: &Arc<Connection>, payload: &Payload, muzzled: bool) {
    if !require_moderator(server, conn) {
        return;
    }
    let Some((caller, nick, targets)) = resolve_targets(server, conn, payload) else {
        return;
    };

    for target in &targets {
        let hash = target.update_identity(|i| {
            i.muzzled = muzzled;
            i.hash.clone()
        });
        if let Some(hash) = hash {
            if muzzled {
                server.police().muzzle(&hash);
            } else {
                server.police().unmuzzle(&hash);
            }
        }
    }

    let verb = if muzzled { "muzzled" } else { "unmuzzled" };
    tell_moderators(
        server,
        format!("{} {} {} in {}", caller.nick, verb, nick, caller.channel),
    );
    info!(moderator = %caller.nick, target = %nick, muzzled, "Muzzle state changed");
}

pub struct Muzzle;

impl Command for Muzzle {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "muzzle",
            aliases: &["dumb"],
            category: Category::Moderator,
            description: "Globally shadow mute a connection. Their messages are only shown to themselves",
            usage: "muzzle {nick}",
            required: &["nick"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        set_muzzled(server, conn, &payload, true);
        Ok(())
    }

    fn hooks(&self) -> Vec<Hook> {
        vec![Hook::inbound("chat", 10, shadow_mute)]
    }
}

pub struct Speak;

impl Command for Speak {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "speak",
            aliases: &["unmuzzle"],
            category: Category::Moderator,
            description: "Pardon a muzzled connection",
            usage: "speak {nick}",
            required: &["nick"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        set_muzzled(server, conn, &payload, false);
        Ok(())
    }
}

/// Muzzled users see their own messages; nobody else does.
///
/// The muzzle is matched on the live flag or the origin hash, so reconnecting
/// does not lift it.
fn shadow_mute(server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<HookAction> {
    let Some(identity) = conn
        .identity()
        .filter(|i| i.muzzled || server.police().is_muzzled(&i.hash))
    else {
        return Ok(HookAction::Continue(payload));
    };
    let Some(text) = message_text(&payload) else {
        return Ok(HookAction::Veto);
    };

    let mut echo = identity.details();
    echo.extend(event(
        Events::CHAT,
        [("text", json!(text)), ("channel", json!(identity.channel))],
    ));
    server.reply(conn, echo);
    Ok(HookAction::Veto)
}
