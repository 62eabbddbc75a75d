//! Built-in relay chat commands.
//!
//! Each module implements `relay_server::Command` and talks to the server
//! only through the `RelayServer` collaborator API.

pub mod admin;
pub mod chat;
pub mod help;
pub mod internal;
pub mod join;
pub mod moderation;
pub mod session;

use std::sync::Arc;

use relay_protocol::levels;
use relay_server::{CommandSet, Connection, Filter, RelayServer};

/// Sent when a caller lacks the level a command needs.
pub const PERMISSION_DENIED: &str = "You do not have permission to use this command.";

/// The command source for a standard server.
pub fn all() -> CommandSet {
    CommandSet::new()
        .with(join::Join)
        .with(chat::Chat)
        .with(session::Session)
        .with(help::Help)
        .with(moderation::Ban)
        .with(moderation::Unban)
        .with(moderation::Muzzle)
        .with(moderation::Speak)
        .with(admin::Reload)
        .with(internal::Disconnect)
}

/// Every connection at moderator level or above.
pub fn moderators() -> Filter {
    Filter::new().when("level", |v| v.as_i64().is_some_and(levels::is_moderator))
}

/// Deny and return false unless the caller is a moderator.
pub(crate) fn require_moderator(server: &RelayServer, conn: &Arc<Connection>) -> bool {
    if levels::is_moderator(conn.level()) {
        return true;
    }
    server.deny(conn, PERMISSION_DENIED);
    false
}

/// Deny and return false unless the caller is an admin.
pub(crate) fn require_admin(server: &RelayServer, conn: &Arc<Connection>) -> bool {
    if levels::is_admin(conn.level()) {
        return true;
    }
    server.deny(conn, PERMISSION_DENIED);
    false
}
