//! Nick and channel name rules.

pub const NICK_MAX_LEN: usize = 24;
pub const CHANNEL_MAX_LEN: usize = 120;

/// `^[A-Za-z0-9_]{1,24}$`
pub fn is_valid_nick(nick: &str) -> bool {
    !nick.is_empty()
        && nick.len() <= NICK_MAX_LEN
        && nick.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Non-blank, bounded, no control characters.
pub fn is_valid_channel(channel: &str) -> bool {
    !channel.trim().is_empty()
        && channel.chars().count() <= CHANNEL_MAX_LEN
        && !channel.chars().any(char::is_control)
}

/// Split `nick#password` into its parts.
pub fn split_nick(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('#') {
        Some((nick, pass)) => (nick.trim(), Some(pass)),
        None => (raw.trim(), None),
    }
}
