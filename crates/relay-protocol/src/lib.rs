//! Relay chat protocol types.
//!
//! A frame is a single JSON object carrying a string `cmd` field; everything
//! else is command-specific. This crate is the single source of truth for
//! frame parsing, event names, privilege levels, and session claims.

pub mod claims;
pub mod error;
pub mod events;
pub mod frame;
pub mod levels;
pub mod naming;

pub use claims::SessionClaims;
pub use error::FrameError;
pub use events::Events;
pub use frame::{MAX_FRAME_BYTES, Payload, ProtocolVersion, command_of, now_ms, parse_frame, stamp};
pub use levels::Level;
