//! Relay Server Router: owns shared state and routes inbound frames.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::{Mutex, MutexGuard};
use rand::Rng;
use relay_protocol::events::{self, event};
use relay_protocol::{Payload, command_of, parse_frame, stamp};
use relay_transport::{ClientSocket, FrameHandler, FrameVerdict};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::authority::{Authority, hash_trip};
use crate::commands::{CommandRegistry, CommandSet, CommandTable, RegistryError};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::hooks::{Direction, Hook, HookPipeline, PipelineOutcome};
use crate::police::RateLimiter;
use crate::registry::{ConnectionRegistry, Filter};
use crate::session::SessionManager;

/// Sent when an origin is over its rate limit or blocked.
pub const RATE_LIMITED: &str = "Your IP is being rate-limited or blocked.";

/// Rate-limit points charged for an attempt to use a command without rights.
pub const PERMISSION_PENALTY: f64 = 10.0;

/// Payload field that authorizes internal commands.
pub const COMMAND_KEY_FIELD: &str = "cmdKey";

/// Number of characters kept from a socket hash.
const SOCKET_HASH_LEN: usize = 15;

/// Produces a fresh command set for each reload.
pub type CommandSource = Box<dyn Fn() -> CommandSet + Send + Sync>;

/// The relay server: owns every registry and routes frames through them.
pub struct RelayServer {
    config: ServerConfig,
    connections: ConnectionRegistry,
    police: RateLimiter,
    hooks: HookPipeline,
    commands: CommandRegistry,
    sessions: SessionManager,
    authority: Arc<dyn Authority>,
    /// Per-boot secret required by internal commands
    cmd_key: String,
    /// Per-boot salt for socket hashes
    hash_salt: String,
    /// Serializes presence check-then-set sections
    presence: Mutex<()>,
    source: CommandSource,
}

impl RelayServer {
    /// Build a server with an empty command table. Call [`reload`](Self::reload)
    /// to load commands from `source`.
    pub fn new(
        config: ServerConfig,
        authority: Arc<dyn Authority>,
        source: impl Fn() -> CommandSet + Send + Sync + 'static,
    ) -> Self {
        let mut rng = rand::rng();
        let cmd_key = hex::encode(rng.random::<[u8; 32]>());
        let hash_salt = hex::encode(rng.random::<[u8; 16]>());

        Self {
            police: RateLimiter::new(config.rate_halflife_ms, config.rate_threshold),
            sessions: SessionManager::new(config.session_secret.clone(), config.session_ttl),
            config,
            connections: ConnectionRegistry::new(),
            hooks: HookPipeline::new(),
            commands: CommandRegistry::new(),
            authority,
            cmd_key,
            hash_salt,
            presence: Mutex::new(()),
            source: Box::new(source),
        }
    }

    /// Rebuild the command table from the source and publish it with its hooks.
    ///
    /// On error nothing changes and the previous table stays live.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let set = (self.source)();
        let (table, hooks) = CommandTable::build(set, self)?;
        let hook_count = hooks.len();

        self.commands.publish(table);
        self.hooks.replace(hooks);

        let count = self.commands.len();
        info!(commands = count, hooks = hook_count, "Command table loaded");
        Ok(count)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn police(&self) -> &RateLimiter {
        &self.police
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn authority(&self) -> &dyn Authority {
        self.authority.as_ref()
    }

    pub fn cmd_key(&self) -> &str {
        &self.cmd_key
    }

    /// Hold while checking and changing presence. Never hold across `.await`.
    pub fn presence_lock(&self) -> MutexGuard<'_, ()> {
        self.presence.lock()
    }

    /// Register a hook on the live table. Dropped by the next reload.
    pub fn register_hook(&self, hook: Hook) {
        self.hooks.register(hook);
    }

    // ── Derived identity ────────────────────────────────────────────────

    /// Anonymized, per-boot hash of a network origin.
    pub fn socket_hash(&self, address: &str) -> String {
        let mut sha = Sha256::new();
        sha.update(address.as_bytes());
        sha.update(self.hash_salt.as_bytes());
        let mut hash = STANDARD.encode(sha.finalize());
        hash.truncate(SOCKET_HASH_LEN);
        hash
    }

    /// Trip for a password, `None` for an empty one.
    pub fn trip_for(&self, password: &str) -> Option<String> {
        (!password.is_empty()).then(|| hash_trip(password, &self.config.trip_salt))
    }

    /// A random user id that survives a JSON round trip through a double.
    pub fn new_userid(&self) -> u64 {
        rand::rng().random_range(1..(1u64 << 53))
    }

    // ── Delivery ────────────────────────────────────────────────────────

    /// Stamp, run `out` hooks for the recipient, and queue the payload.
    ///
    /// Best effort: a closed socket or a serialization failure drops the
    /// payload silently.
    pub fn send(&self, conn: &Arc<Connection>, mut payload: Payload) {
        if !conn.is_open() {
            return;
        }
        stamp(&mut payload);

        let payload = match self.hooks.execute(self, Direction::Out, conn, payload) {
            PipelineOutcome::Continue(payload) => payload,
            PipelineOutcome::Vetoed => return,
            PipelineOutcome::Failed(diagnostic) => {
                let mut notice = events::warn(diagnostic);
                stamp(&mut notice);
                notice
            }
        };

        match serde_json::to_string(&payload) {
            Ok(text) => {
                conn.socket().send_text(text);
            }
            Err(e) => debug!(client_id = %conn.id(), error = %e, "Dropped unserializable payload"),
        }
    }

    /// Send to the originating connection.
    pub fn reply(&self, conn: &Arc<Connection>, payload: Payload) {
        self.send(conn, payload);
    }

    /// Send to every connection matching `filter`. Returns false when none matched.
    pub fn broadcast(&self, payload: Payload, filter: &Filter) -> bool {
        let targets = self.find_sockets(filter);
        for target in &targets {
            self.send(target, payload.clone());
        }
        !targets.is_empty()
    }

    pub fn find_sockets(&self, filter: &Filter) -> Vec<Arc<Connection>> {
        self.connections.find(filter)
    }

    pub fn warn(&self, conn: &Arc<Connection>, text: impl Into<String>) {
        self.send(conn, events::warn(text));
    }

    pub fn info(&self, conn: &Arc<Connection>, text: impl Into<String>) {
        self.send(conn, events::info(text));
    }

    /// Refuse a privileged action: warn the caller and charge its origin.
    pub fn deny(&self, conn: &Arc<Connection>, text: impl Into<String>) {
        self.police.frisk(conn.address(), PERMISSION_PENALTY);
        self.warn(conn, text);
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Run a command on behalf of the server, bypassing hooks and gates.
    pub async fn dispatch_internal(&self, conn: &Arc<Connection>, mut payload: Payload) {
        payload.insert(COMMAND_KEY_FIELD.into(), Value::from(self.cmd_key.as_str()));
        self.commands.handle(self, conn, payload).await;
    }

    /// Convenience for building and dispatching an internal command.
    pub async fn dispatch_internal_cmd(&self, conn: &Arc<Connection>, cmd: &str) {
        self.dispatch_internal(conn, event(cmd, [])).await;
    }

    fn has_command_key(&self, payload: &Payload) -> bool {
        payload.get(COMMAND_KEY_FIELD).and_then(Value::as_str) == Some(self.cmd_key.as_str())
    }

    /// Every gate between a raw frame and the dispatcher.
    async fn route(&self, conn: &Arc<Connection>, text: &str) -> FrameVerdict {
        let address = conn.address();

        if self.police.frisk(address, 0.0) {
            self.warn(conn, RATE_LIMITED);
            return FrameVerdict::Continue;
        }
        self.police.frisk(address, 1.0);

        if text.len() > self.config.max_frame_bytes {
            debug!(client_id = %conn.id(), bytes = text.len(), "Dropped oversize frame");
            return FrameVerdict::Continue;
        }

        let payload = match parse_frame(text) {
            Ok(payload) => payload,
            Err(e) if e.closes_connection() => {
                debug!(client_id = %conn.id(), error = %e, "Malformed frame, closing");
                return FrameVerdict::Close;
            }
            Err(e) => {
                debug!(client_id = %conn.id(), error = %e, "Dropped frame");
                return FrameVerdict::Continue;
            }
        };
        let Some(cmd) = command_of(&payload).map(str::to_string) else {
            return FrameVerdict::Continue;
        };

        if self.commands.is_internal(&cmd) && !self.has_command_key(&payload) {
            debug!(client_id = %conn.id(), cmd = %cmd, "Dropped internal command without key");
            return FrameVerdict::Continue;
        }

        if !conn.is_active() && !self.config.pre_identity_commands.iter().any(|c| *c == cmd) {
            debug!(client_id = %conn.id(), cmd = %cmd, "Dropped command before identity");
            return FrameVerdict::Continue;
        }

        let payload = match self.hooks.execute(self, Direction::In, conn, payload) {
            PipelineOutcome::Continue(payload) => payload,
            PipelineOutcome::Vetoed => return FrameVerdict::Continue,
            PipelineOutcome::Failed(diagnostic) => {
                self.warn(conn, diagnostic);
                return FrameVerdict::Continue;
            }
        };

        self.commands.handle(self, conn, payload).await;
        FrameVerdict::Continue
    }
}

impl FrameHandler for RelayServer {
    async fn on_connect(&self, socket: ClientSocket) {
        debug!(client_id = %socket.id, address = %socket.address, "Connection registered");
        self.connections.insert(Arc::new(Connection::new(socket)));
    }

    async fn handle_frame(&self, client_id: &str, text: &str) -> FrameVerdict {
        let Some(conn) = self.connections.get(client_id) else {
            warn!(client_id, "Frame for unknown connection");
            return FrameVerdict::Close;
        };
        self.route(&conn, text).await
    }

    async fn on_disconnect(&self, client_id: &str) {
        let Some(conn) = self.connections.get(client_id) else {
            return;
        };
        if conn.is_active() {
            self.dispatch_internal_cmd(&conn, "disconnect").await;
        }
        self.connections.remove(client_id);
        debug!(client_id, "Connection removed");
    }
}
