//! Hook pipeline for frame interception.
//!
//! Hooks inspect and rewrite payloads of one command name, either inbound
//! (before dispatch) or outbound (before delivery to one recipient). They run
//! in ascending priority order; equal priorities keep registration order.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_protocol::{Payload, command_of};
use tracing::warn;

use crate::connection::Connection;
use crate::router::RelayServer;

/// Priority used when a hook does not ask for one.
pub const DEFAULT_PRIORITY: i32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → server, before dispatch.
    In,
    /// Server → client, before delivery.
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// What a hook wants done with the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    /// Pass the (possibly modified) payload to the next hook.
    Continue(Payload),
    /// Stop silently: no further hooks, no dispatch or delivery.
    Veto,
}

/// Result of running a whole bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Continue(Payload),
    Vetoed,
    /// A hook failed; the diagnostic is meant for the originating connection.
    Failed(String),
}

pub type HookFn =
    Arc<dyn Fn(&RelayServer, &Arc<Connection>, Payload) -> anyhow::Result<HookAction> + Send + Sync>;

/// One registration: (direction, command, priority, callback).
#[derive(Clone)]
pub struct Hook {
    pub direction: Direction,
    pub command: String,
    pub priority: i32,
    callback: HookFn,
}

impl Hook {
    pub fn new(
        direction: Direction,
        command: impl Into<String>,
        priority: i32,
        callback: impl Fn(&RelayServer, &Arc<Connection>, Payload) -> anyhow::Result<HookAction>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            direction,
            command: command.into(),
            priority,
            callback: Arc::new(callback),
        }
    }

    pub fn inbound(
        command: impl Into<String>,
        priority: i32,
        callback: impl Fn(&RelayServer, &Arc<Connection>, Payload) -> anyhow::Result<HookAction>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(Direction::In, command, priority, callback)
    }

    pub fn outbound(
        command: impl Into<String>,
        priority: i32,
        callback: impl Fn(&RelayServer, &Arc<Connection>, Payload) -> anyhow::Result<HookAction>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::new(Direction::Out, command, priority, callback)
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("direction", &self.direction)
            .field("command", &self.command)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Hooks bucketed by (direction, command), each bucket sorted by priority.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    buckets: HashMap<(Direction, String), Vec<Hook>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: Hook) {
        let bucket = self
            .buckets
            .entry((hook.direction, hook.command.clone()))
            .or_default();
        bucket.push(hook);
        // Stable sort: equal priorities keep registration order.
        bucket.sort_by_key(|h| h.priority);
    }

    fn bucket(&self, direction: Direction, command: &str) -> &[Hook] {
        self.buckets
            .get(&(direction, command.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The live hook table.
///
/// Runs read a snapshot, so registration or a reload during a run never
/// changes the hooks that run sees.
#[derive(Debug, Default)]
pub struct HookPipeline {
    table: RwLock<Arc<HookTable>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one hook to the live table.
    pub fn register(&self, hook: Hook) {
        let mut table = self.table.write();
        let mut next = HookTable::clone(&table);
        next.add(hook);
        *table = Arc::new(next);
    }

    /// Swap in a whole new table.
    pub fn replace(&self, table: HookTable) {
        *self.table.write() = Arc::new(table);
    }

    pub fn snapshot(&self) -> Arc<HookTable> {
        self.table.read().clone()
    }

    /// Thread `payload` through every hook registered for its `cmd`.
    pub fn execute(
        &self,
        server: &RelayServer,
        direction: Direction,
        conn: &Arc<Connection>,
        mut payload: Payload,
    ) -> PipelineOutcome {
        let Some(cmd) = command_of(&payload).map(str::to_string) else {
            return PipelineOutcome::Continue(payload);
        };

        let table = self.snapshot();
        for hook in table.bucket(direction, &cmd) {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                (hook.callback)(server, conn, payload.clone())
            }));

            let detail = match result {
                Ok(Ok(HookAction::Continue(next))) => {
                    payload = next;
                    continue;
                }
                Ok(Ok(HookAction::Veto)) => return PipelineOutcome::Vetoed,
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => "hook panicked".to_string(),
            };

            let diagnostic = format!("Hook failure, '{}', '{}': {}", direction.as_str(), cmd, detail);
            warn!(client_id = %conn.id(), "{diagnostic}");
            return PipelineOutcome::Failed(diagnostic);
        }

        PipelineOutcome::Continue(payload)
    }
}
