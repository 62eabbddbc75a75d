//! Privilege levels.
//!
//! Levels are a total order; higher is more privileged. Always compare with
//! `>=` against a named threshold so new levels can slot in between.

pub type Level = i64;

pub const ADMIN: Level = 9_999_999;
pub const MODERATOR: Level = 999_999;
pub const CHANNEL_OWNER: Level = 99_999;
pub const CHANNEL_MODERATOR: Level = 9_999;
pub const CHANNEL_TRUSTED: Level = 8_999;
pub const TRUSTED_USER: Level = 7_999;
pub const DEFAULT: Level = 100;

pub fn is_admin(level: Level) -> bool {
    level >= ADMIN
}

pub fn is_moderator(level: Level) -> bool {
    level >= MODERATOR
}

/// Coarse user type label carried on presence and chat events.
pub fn user_type(level: Level) -> &'static str {
    if is_admin(level) {
        "admin"
    } else if is_moderator(level) {
        "mod"
    } else {
        "user"
    }
}
