//! Live connection state.

use parking_lot::Mutex;
use relay_protocol::levels::{self, Level};
use relay_protocol::{Payload, ProtocolVersion};
use relay_transport::ClientSocket;
use serde_json::{Value, json};

/// Attributes established by `join` or a session restore.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub nick: String,
    pub trip: Option<String>,
    pub level: Level,
    pub color: Option<String>,
    pub flair: Option<String>,
    /// Active channel
    pub channel: String,
    /// Every channel this identity is present in
    pub channels: Vec<String>,
    /// Anonymized origin hash
    pub hash: String,
    pub protocol: ProtocolVersion,
    pub userid: u64,
    /// Shadow-muted
    pub muzzled: bool,
}

impl Identity {
    /// Public details carried on presence and chat events.
    pub fn details(&self) -> Payload {
        let mut details = Payload::new();
        details.insert("nick".into(), json!(self.nick));
        details.insert("trip".into(), json!(self.trip));
        details.insert("uType".into(), json!(levels::user_type(self.level)));
        details.insert("level".into(), json!(self.level));
        details.insert("userid".into(), json!(self.userid));
        details.insert("color".into(), json!(self.color));
        details.insert("flair".into(), json!(self.flair));
        details
    }

    /// Whether `other` is the same person: nick (case-insensitive) and trip
    /// both match.
    pub fn same_person(&self, other: &Identity) -> bool {
        self.nick.eq_ignore_ascii_case(&other.nick) && self.trip == other.trip
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    identity: Option<Identity>,
    /// Ephemeral per-connection state owned by hooks (e.g. a pending challenge)
    extras: Payload,
}

/// One live socket plus its mutable state.
///
/// State sits behind a mutex that is never held across an `.await`.
#[derive(Debug)]
pub struct Connection {
    socket: ClientSocket,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(socket: ClientSocket) -> Self {
        Self {
            socket,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.socket.id
    }

    pub fn address(&self) -> &str {
        &self.socket.address
    }

    pub fn socket(&self) -> &ClientSocket {
        &self.socket
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// Whether an identity has been established.
    pub fn is_active(&self) -> bool {
        self.state.lock().identity.is_some()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    pub fn nick(&self) -> Option<String> {
        self.state.lock().identity.as_ref().map(|i| i.nick.clone())
    }

    /// Privilege level, or 0 before an identity exists.
    pub fn level(&self) -> Level {
        self.state.lock().identity.as_ref().map_or(0, |i| i.level)
    }

    /// Set the identity if none exists yet. Returns false when already active.
    pub fn establish(&self, identity: Identity) -> bool {
        let mut state = self.state.lock();
        if state.identity.is_some() {
            return false;
        }
        state.identity = Some(identity);
        true
    }

    /// Mutate the identity in place. `None` when there is no identity.
    pub fn update_identity<R>(&self, f: impl FnOnce(&mut Identity) -> R) -> Option<R> {
        self.state.lock().identity.as_mut().map(f)
    }

    /// Remove and return the identity.
    pub fn clear_identity(&self) -> Option<Identity> {
        self.state.lock().identity.take()
    }

    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.lock().extras.insert(key.into(), value);
    }

    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.state.lock().extras.get(key).cloned()
    }

    pub fn remove_state(&self, key: &str) -> Option<Value> {
        self.state.lock().extras.remove(key)
    }

    /// Attribute lookup used by filtered broadcast.
    ///
    /// `None` means the connection does not possess the field at all, which
    /// is different from possessing it with a `null` value.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => return Some(json!(self.id())),
            "address" => return Some(json!(self.address())),
            _ => {}
        }

        let state = self.state.lock();
        if let Some(identity) = state.identity.as_ref() {
            let value = match name {
                "nick" => Some(json!(identity.nick)),
                "trip" => Some(json!(identity.trip)),
                "level" => Some(json!(identity.level)),
                "color" => Some(json!(identity.color)),
                "flair" => Some(json!(identity.flair)),
                "channel" => Some(json!(identity.channel)),
                "channels" => Some(json!(identity.channels)),
                "hash" => Some(json!(identity.hash)),
                "protocol" => Some(json!(identity.protocol.as_u8())),
                "userid" => Some(json!(identity.userid)),
                "muzzled" => Some(json!(identity.muzzled)),
                _ => None,
            };
            if value.is_some() {
                return value;
            }
        }
        state.extras.get(name).cloned()
    }
}
