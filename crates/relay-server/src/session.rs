//! Session tokens and reconnection.
//!
//! A token is `v1.<payload>.<signature>`: base64url (no padding) of the JSON
//! claims, then base64url of HMAC-SHA256 over the encoded payload. Nothing is
//! stored server-side; the claims are the whole session.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use relay_protocol::events::event;
use relay_protocol::levels::{self, Level};
use relay_protocol::{Events, SessionClaims};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, info};

use crate::authority::Authority;
use crate::connection::{Connection, Identity};
use crate::presence::{self, PresenceError};
use crate::router::RelayServer;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";

/// Why a token was rejected. Logged, never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Format,

    #[error("invalid token signature")]
    Signature,

    #[error("token expired")]
    Expired,

    #[error("malformed claims: {0}")]
    Claims(String),

    #[error("encode claims: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid signing key")]
    Key,

    #[error("presence: {0}")]
    Presence(#[from] PresenceError),
}

/// Issues and verifies session tokens.
pub struct SessionManager {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// A missing secret gets a random per-boot key.
    pub fn new(secret: Option<Vec<u8>>, ttl: Duration) -> Self {
        let key = match secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => rand::rng().random::<[u8; 32]>().to_vec(),
        };
        Self { key, ttl }
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| SessionError::Key)
    }

    /// Encode and sign `claims`.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{TOKEN_VERSION}.{payload}.{signature}"))
    }

    /// Check signature, expiry and claim shape.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        self.verify_at(token, unix_now())
    }

    pub(crate) fn verify_at(&self, token: &str, now: u64) -> Result<SessionClaims, SessionError> {
        let mut parts = token.split('.');
        let (Some(version), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::Format);
        };
        if version != TOKEN_VERSION {
            return Err(SessionError::Format);
        }

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::Format)?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| SessionError::Signature)?;

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Format)?;
        let claims: SessionClaims =
            serde_json::from_slice(&raw).map_err(|e| SessionError::Claims(e.to_string()))?;

        if claims.exp <= now {
            return Err(SessionError::Expired);
        }
        if !claims.is_well_formed() {
            return Err(SessionError::Claims("shape".into()));
        }
        Ok(claims)
    }

    /// Claims snapshot of an identity, valid for the configured lifetime.
    pub fn claims_for(&self, identity: &Identity) -> SessionClaims {
        let iat = unix_now();
        SessionClaims {
            nick: identity.nick.clone(),
            trip: identity.trip.clone(),
            level: identity.level,
            color: identity.color.clone(),
            flair: identity.flair.clone(),
            channel: identity.channel.clone(),
            channels: identity.channels.clone(),
            protocol: identity.protocol,
            userid: identity.userid,
            muzzled: identity.muzzled,
            iat,
            exp: iat.saturating_add(self.ttl.as_secs()),
        }
    }

    /// Fresh token for the connection's current identity.
    pub fn issue(&self, conn: &Connection) -> Option<String> {
        let identity = conn.identity()?;
        match self.sign(&self.claims_for(&identity)) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(client_id = %conn.id(), error = %e, "session token not issued");
                None
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Privilege a restored claim may keep.
///
/// Elevated claims survive only while the live roster still backs the trip,
/// and never rise above what was claimed.
pub fn reconcile_level(authority: &dyn Authority, claimed: Level, trip: Option<&str>) -> Level {
    if claimed < levels::MODERATOR {
        return claimed;
    }
    let live = authority.level_for(trip);
    if live >= levels::MODERATOR {
        claimed.min(live)
    } else {
        levels::DEFAULT
    }
}

/// The uniform failed-restore response.
pub fn failure_payload() -> relay_protocol::Payload {
    event(
        Events::SESSION,
        [("restored", json!(false)), ("channels", json!([]))],
    )
}

/// A freshly issued token for an identity that was not restored.
pub fn issued_payload(token: String, channels: &[String]) -> relay_protocol::Payload {
    event(
        Events::SESSION,
        [
            ("restored", Value::Bool(false)),
            ("token", Value::String(token)),
            ("channels", json!(channels)),
        ],
    )
}

/// Re-establish a connection's identity and channels from `token`.
///
/// Every failure produces the same reply and leaves the connection untouched.
pub fn restore(server: &RelayServer, conn: &Arc<Connection>, token: &str) -> bool {
    match try_restore(server, conn, token) {
        Ok(()) => true,
        Err(e) => {
            debug!(client_id = %conn.id(), error = %e, "session restore refused");
            server.reply(conn, failure_payload());
            false
        }
    }
}

fn try_restore(server: &RelayServer, conn: &Arc<Connection>, token: &str) -> Result<(), SessionError> {
    let claims = server.sessions().verify(token)?;
    let level = reconcile_level(server.authority(), claims.level, claims.trip.as_deref());

    let identity = Identity {
        nick: claims.nick,
        trip: claims.trip,
        level,
        color: claims.color,
        flair: claims.flair,
        channel: claims.channel,
        channels: claims.channels,
        hash: server.socket_hash(conn.address()),
        protocol: claims.protocol,
        userid: claims.userid,
        muzzled: claims.muzzled,
    };

    let token = server
        .sessions()
        .sign(&server.sessions().claims_for(&identity))?;
    let arrivals = presence::restore(server, conn, identity.clone())?;

    server.reply(
        conn,
        event(
            Events::SESSION,
            [
                ("restored", Value::Bool(true)),
                ("token", Value::String(token)),
                ("channels", json!(identity.channels)),
            ],
        ),
    );
    presence::announce(server, conn, &identity, arrivals);

    info!(client_id = %conn.id(), nick = %identity.nick, channels = identity.channels.len(), "session restored");
    Ok(())
}
