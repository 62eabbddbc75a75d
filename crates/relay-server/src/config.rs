//! Server configuration.

use std::time::Duration;

use relay_protocol::MAX_FRAME_BYTES;

/// Tunables for the routing and protection engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Time for a rate-limit score to decay by half, in ms
    pub rate_halflife_ms: u64,
    /// Score at or above which an identifier is over the limit
    pub rate_threshold: f64,
    /// Lifetime of issued session tokens
    pub session_ttl: Duration,
    /// HMAC key for session tokens. Random per boot when unset, which
    /// invalidates every outstanding token on restart.
    pub session_secret: Option<Vec<u8>>,
    /// Salt mixed into trip derivation
    pub trip_salt: String,
    /// Commands a connection may send before it has an identity
    pub pre_identity_commands: Vec<String>,
    /// Maximum edit distance for "did you mean" suggestions
    pub suggest_distance: usize,
    /// Inbound frames above this size are dropped
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rate_halflife_ms: 30_000,
            rate_threshold: 25.0,
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            session_secret: None,
            trip_salt: String::new(),
            pre_identity_commands: vec!["join".into(), "session".into()],
            suggest_distance: 2,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}
