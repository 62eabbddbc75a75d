//! Session claims: the identity snapshot carried inside a session token.
//!
//! Claims are never stored server-side. Deserialization is strict: every
//! field must be present with the right JSON type, and unknown fields are
//! rejected, so a token whose shape was tampered with fails exactly like one
//! with a bad signature.

use serde::{Deserialize, Serialize};

use crate::frame::ProtocolVersion;
use crate::levels::Level;
use crate::naming::{is_valid_channel, is_valid_nick};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClaims {
    pub nick: String,
    /// Empty trips are carried as `null`.
    pub trip: Option<String>,
    pub level: Level,
    pub color: Option<String>,
    pub flair: Option<String>,
    /// Active channel.
    pub channel: String,
    /// Every channel held when the token was issued.
    pub channels: Vec<String>,
    pub protocol: ProtocolVersion,
    pub userid: u64,
    pub muzzled: bool,
    /// Issued at, seconds since the epoch.
    pub iat: u64,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

impl SessionClaims {
    /// Shape checks beyond what the JSON types enforce.
    pub fn is_well_formed(&self) -> bool {
        if !is_valid_nick(&self.nick) {
            return false;
        }
        if self.trip.as_deref().is_some_and(str::is_empty) {
            return false;
        }
        if self.channels.is_empty() || !self.channels.iter().all(|c| is_valid_channel(c)) {
            return false;
        }
        if !self.channels.contains(&self.channel) {
            return false;
        }
        self.iat <= self.exp
    }
}
