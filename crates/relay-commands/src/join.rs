//! `join`: enter a channel with a nickname.

use std::sync::Arc;

use relay_protocol::naming::{is_valid_channel, is_valid_nick, split_nick};
use relay_protocol::{Payload, ProtocolVersion};
use relay_server::session::issued_payload;
use relay_server::{
    Category, Command, CommandInfo, Connection, Identity, PresenceError, RelayServer, presence,
};
use serde_json::Value;
use tracing::info;

/// Rate-limit cost of a join attempt.
const JOIN_COST: f64 = 3.0;

pub const JOINING_TOO_FAST: &str = "You are joining channels too fast. Wait a moment and try again.";
pub const ALREADY_JOINED: &str = "You are already joined. Use `session` to restore other channels.";
pub const NICK_TAKEN: &str = "Nickname taken";
pub const INVALID_NICK: &str = "Nickname must consist of up to 24 letters, numbers, and underscores";
pub const INVALID_CHANNEL: &str = "Channel name is not valid.";

pub struct Join;

impl Command for Join {
    fn info(&self) -> CommandInfo {
        CommandInfo {
            name: "join",
            aliases: &[],
            category: Category::Core,
            description: "Place calling socket into target channel with target nick",
            usage: "join {channel} {nick}[#password]",
            required: &["channel", "nick"],
        }
    }

    async fn run(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) -> anyhow::Result<()> {
        if conn.is_active() {
            server.warn(conn, ALREADY_JOINED);
            return Ok(());
        }

        if server.police().frisk(conn.address(), JOIN_COST) {
            server.warn(conn, JOINING_TOO_FAST);
            return Ok(());
        }

        let Some(channel) = payload
            .get("channel")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| is_valid_channel(c))
        else {
            server.warn(conn, INVALID_CHANNEL);
            return Ok(());
        };

        let raw_nick = payload.get("nick").and_then(Value::as_str).unwrap_or_default();
        let (nick, inline_pass) = split_nick(raw_nick);
        if !is_valid_nick(nick) {
            server.warn(conn, INVALID_NICK);
            return Ok(());
        }
        let pass = payload
            .get("pass")
            .and_then(Value::as_str)
            .or(inline_pass)
            .unwrap_or_default();

        let trip = server.trip_for(pass);
        let identity = Identity {
            nick: nick.to_string(),
            level: server.authority().level_for(trip.as_deref()),
            trip,
            color: None,
            flair: None,
            channel: channel.to_string(),
            channels: vec![channel.to_string()],
            hash: server.socket_hash(conn.address()),
            protocol: ProtocolVersion::from_payload(&payload),
            userid: server.new_userid(),
            muzzled: false,
        };

        let arrivals = match presence::join(server, conn, identity.clone()) {
            Ok(arrivals) => arrivals,
            Err(PresenceError::NickTaken) => {
                server.warn(conn, NICK_TAKEN);
                return Ok(());
            }
            Err(PresenceError::AlreadyActive) => {
                server.warn(conn, ALREADY_JOINED);
                return Ok(());
            }
        };

        presence::announce(server, conn, &identity, arrivals);
        if let Some(token) = server.sessions().issue(conn) {
            server.reply(conn, issued_payload(token, &identity.channels));
        }

        info!(
            client_id = %conn.id(),
            nick = %identity.nick,
            channel = %identity.channel,
            level = identity.level,
            "Joined"
        );
        Ok(())
    }
}
