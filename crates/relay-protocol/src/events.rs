//! Outbound event names and notice builders.
//!
//! Events are server-to-client frames; clients render them by `cmd`.

use serde_json::Value;

use crate::frame::Payload;

/// All outbound event names.
pub struct Events;

impl Events {
    // ── Notices ─────────────────────────────────────────────────────────
    pub const WARN: &str = "warn";
    pub const INFO: &str = "info";

    // ── Messages ────────────────────────────────────────────────────────
    pub const CHAT: &str = "chat";

    // ── Presence ────────────────────────────────────────────────────────
    pub const ONLINE_SET: &str = "onlineSet";
    pub const ONLINE_ADD: &str = "onlineAdd";
    pub const ONLINE_REMOVE: &str = "onlineRemove";
    pub const UPDATE_USER: &str = "updateUser";

    // ── Session ─────────────────────────────────────────────────────────
    pub const SESSION: &str = "session";
}

/// Build a payload with the given `cmd` and fields.
pub fn event(cmd: &str, fields: impl IntoIterator<Item = (&'static str, Value)>) -> Payload {
    let mut payload = Payload::new();
    payload.insert("cmd".into(), Value::from(cmd));
    for (key, value) in fields {
        payload.insert(key.into(), value);
    }
    payload
}

/// A `warn` notice.
pub fn warn(text: impl Into<String>) -> Payload {
    event(Events::WARN, [("text", Value::String(text.into()))])
}

/// An `info` notice.
pub fn info(text: impl Into<String>) -> Payload {
    event(Events::INFO, [("text", Value::String(text.into()))])
}
