//! Relay Server: the command routing and protection engine.
//!
//! The server owns the connection registry, the rate limiter, the hook
//! pipeline, the command registry and the session manager, and provides the
//! `FrameHandler` implementation for the transport layer.

pub mod authority;
pub mod commands;
pub mod config;
pub mod connection;
pub mod hooks;
pub mod police;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;

pub use authority::{Authority, Roster};
pub use commands::{Category, Command, CommandInfo, CommandRegistry, CommandSet, RegistryError};
pub use config::ServerConfig;
pub use connection::{Connection, Identity};
pub use hooks::{DEFAULT_PRIORITY, Direction, Hook, HookAction, HookPipeline, PipelineOutcome};
pub use police::RateLimiter;
pub use presence::{Arrivals, PresenceError};
pub use registry::{ConnectionRegistry, Filter, Matcher};
pub use router::{CommandSource, PERMISSION_PENALTY, RATE_LIMITED, RelayServer};
pub use session::{SessionError, SessionManager};
