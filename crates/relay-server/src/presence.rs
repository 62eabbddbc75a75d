//! Channel presence: arrivals, departures and member lists.
//!
//! Check-then-set sections run under the server's presence lock. Events are
//! sent after the lock is released, since delivery runs `out` hooks.

use std::sync::Arc;

use relay_protocol::events::event;
use relay_protocol::{Events, Payload, ProtocolVersion};
use serde_json::{Value, json};

use crate::connection::{Connection, Identity};
use crate::registry::Filter;
use crate::router::RelayServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    #[error("identity already established")]
    AlreadyActive,

    #[error("nickname taken")]
    NickTaken,
}

/// Peers seen in each channel at the moment an identity was established.
#[derive(Debug, Default)]
pub struct Arrivals {
    channels: Vec<(String, Vec<Arc<Connection>>)>,
}

fn peers(server: &RelayServer, conn: &Connection, channel: &str) -> Vec<Arc<Connection>> {
    server.find_sockets(&Filter::in_channel(channel).except(conn.id()))
}

fn holds_nick(peer: &Connection, nick: &str) -> bool {
    peer.nick().is_some_and(|held| held.eq_ignore_ascii_case(nick))
}

fn represents(peer: &Connection, identity: &Identity) -> bool {
    peer.identity().is_some_and(|held| held.same_person(identity))
}

/// Establish a fresh identity in its active channel.
///
/// Fails when the connection already has an identity or when another
/// connection in the channel holds the nick (case-insensitive).
pub fn join(
    server: &RelayServer,
    conn: &Arc<Connection>,
    identity: Identity,
) -> Result<Arrivals, PresenceError> {
    let _guard = server.presence_lock();
    if conn.is_active() {
        return Err(PresenceError::AlreadyActive);
    }

    let channel = identity.channel.clone();
    let present = peers(server, conn, &channel);
    if present.iter().any(|peer| holds_nick(peer, &identity.nick)) {
        return Err(PresenceError::NickTaken);
    }

    if !conn.establish(identity) {
        return Err(PresenceError::AlreadyActive);
    }
    Ok(Arrivals {
        channels: vec![(channel, present)],
    })
}

/// Establish a restored identity in every channel it lists.
///
/// The same person already present in a channel is not a conflict; the
/// peers receive an update instead of an arrival. The nick held by anyone
/// else (a different trip) fails the whole restore.
pub fn restore(
    server: &RelayServer,
    conn: &Arc<Connection>,
    identity: Identity,
) -> Result<Arrivals, PresenceError> {
    let _guard = server.presence_lock();
    if conn.is_active() {
        return Err(PresenceError::AlreadyActive);
    }

    let mut channels = Vec::with_capacity(identity.channels.len());
    for channel in &identity.channels {
        let present = peers(server, conn, channel);
        let taken = present
            .iter()
            .any(|peer| holds_nick(peer, &identity.nick) && !represents(peer, &identity));
        if taken {
            return Err(PresenceError::NickTaken);
        }
        channels.push((channel.clone(), present));
    }

    if !conn.establish(identity) {
        return Err(PresenceError::AlreadyActive);
    }
    Ok(Arrivals { channels })
}

/// Tell peers about the arrival and send the arriving connection each
/// channel's member list.
pub fn announce(server: &RelayServer, conn: &Arc<Connection>, identity: &Identity, arrivals: Arrivals) {
    for (channel, present) in arrivals.channels {
        let duplicate = present.iter().any(|peer| represents(peer, identity));

        let mut notice = identity.details();
        notice.insert("channel".into(), json!(channel));
        let cmd = if duplicate {
            Events::UPDATE_USER
        } else {
            Events::ONLINE_ADD
        };
        notice.insert("cmd".into(), json!(cmd));
        for peer in &present {
            server.send(peer, notice.clone());
        }

        server.reply(conn, online_set(identity, &channel, &present));
    }
}

fn online_set(identity: &Identity, channel: &str, present: &[Arc<Connection>]) -> Payload {
    let mut members: Vec<Identity> = present.iter().filter_map(|peer| peer.identity()).collect();
    members.push(identity.clone());

    let mut nicks: Vec<String> = members.iter().map(|m| m.nick.clone()).collect();
    nicks.dedup();

    let mut payload = event(
        Events::ONLINE_SET,
        [("nicks", json!(nicks)), ("channel", json!(channel))],
    );
    if identity.protocol == ProtocolVersion::Current {
        let users: Vec<Value> = members
            .iter()
            .map(|member| {
                let mut details = member.details();
                details.insert("channel".into(), json!(channel));
                Value::Object(details)
            })
            .collect();
        payload.insert("users".into(), Value::Array(users));
    }
    payload
}

/// Remove the identity and tell each channel it no longer appears in.
pub fn depart(server: &RelayServer, conn: &Arc<Connection>) -> Option<Identity> {
    let (identity, departures) = {
        let _guard = server.presence_lock();
        let identity = conn.clear_identity()?;
        let departures: Vec<(String, Vec<Arc<Connection>>)> = identity
            .channels
            .iter()
            .filter_map(|channel| {
                let others = peers(server, conn, channel);
                let represented = others.iter().any(|other| represents(other, &identity));
                (!represented).then(|| (channel.clone(), others))
            })
            .collect();
        (identity, departures)
    };

    for (channel, others) in departures {
        let notice = event(
            Events::ONLINE_REMOVE,
            [
                ("userid", json!(identity.userid)),
                ("nick", json!(identity.nick)),
                ("channel", json!(channel)),
            ],
        );
        for other in &others {
            server.send(other, notice.clone());
        }
    }
    Some(identity)
}
