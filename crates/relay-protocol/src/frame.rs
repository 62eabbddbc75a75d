//! Frame parsing and outbound stamping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;

/// A command payload: the JSON object of one frame.
pub type Payload = Map<String, Value>;

/// Inbound frames larger than this are dropped without a reply.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Client protocol generation, chosen at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    /// Nick lists only.
    #[default]
    Legacy,
    /// Full user objects in presence events.
    Current,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Legacy => 1,
            Self::Current => 2,
        }
    }

    /// Reads the optional `protocol` field of a join frame.
    pub fn from_payload(payload: &Payload) -> Self {
        match payload.get("protocol").and_then(Value::as_u64) {
            Some(2) => Self::Current,
            _ => Self::Legacy,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Current),
            other => Err(format!("unknown protocol version {other}")),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(value: ProtocolVersion) -> Self {
        value.as_u8()
    }
}

/// Parse an inbound text frame into a payload with a string `cmd`.
pub fn parse_frame(text: &str) -> Result<Payload, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(payload) = value else {
        return Err(FrameError::NotObject);
    };
    if command_of(&payload).is_none() {
        return Err(FrameError::MissingCommand);
    }
    Ok(payload)
}

/// The `cmd` of a payload, if it is a string.
pub fn command_of(payload: &Payload) -> Option<&str> {
    payload.get("cmd").and_then(Value::as_str)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stamp an outbound payload with the server `time`.
pub fn stamp(payload: &mut Payload) {
    payload.insert("time".into(), Value::from(now_ms()));
}
