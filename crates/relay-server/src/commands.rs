//! Command registry and dispatcher.
//!
//! Command modules implement [`Command`]. A [`CommandSet`] is built by the
//! command source and turned into a table on every reload; the live table is
//! swapped as a whole, so dispatch never sees a half-built registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use relay_protocol::{Payload, command_of};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::hooks::{Hook, HookTable};
use crate::router::RelayServer;

// ── Descriptors ─────────────────────────────────────────────────────────

/// Grouping used by `help` and for internal-only gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Core,
    Moderator,
    Admin,
    /// Server-originated only; requires the per-boot command key.
    Internal,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Moderator => "mod",
            Self::Admin => "admin",
            Self::Internal => "internal",
        }
    }
}

/// Static description of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: Category,
    pub description: &'static str,
    pub usage: &'static str,
    /// Payload fields that must be present before `run` is called.
    pub required: &'static [&'static str],
}

/// A command module.
pub trait Command: Send + Sync + 'static {
    fn info(&self) -> CommandInfo;

    /// Execute against a payload that has passed the required-field gate.
    fn run(
        &self,
        server: &RelayServer,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// One-time setup, run on every reload before the table is published.
    fn init(&self, _server: &RelayServer) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hooks this module contributes.
    fn hooks(&self) -> Vec<Hook> {
        Vec::new()
    }
}

/// Object-safe wrapper for the Command trait.
pub(crate) trait CommandDyn: Send + Sync {
    fn info_dyn(&self) -> CommandInfo;
    fn run_dyn<'a>(
        &'a self,
        server: &'a RelayServer,
        conn: &'a Arc<Connection>,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
    fn init_dyn(&self, server: &RelayServer) -> anyhow::Result<()>;
    fn hooks_dyn(&self) -> Vec<Hook>;
}

impl<T: Command> CommandDyn for T {
    fn info_dyn(&self) -> CommandInfo {
        self.info()
    }
    fn run_dyn<'a>(
        &'a self,
        server: &'a RelayServer,
        conn: &'a Arc<Connection>,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.run(server, conn, payload))
    }
    fn init_dyn(&self, server: &RelayServer) -> anyhow::Result<()> {
        self.init(server)
    }
    fn hooks_dyn(&self) -> Vec<Hook> {
        self.hooks()
    }
}

/// An unvalidated batch of commands, as produced by a command source.
#[derive(Default)]
pub struct CommandSet {
    commands: Vec<Arc<dyn CommandDyn>>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<C: Command>(mut self, command: C) -> Self {
        self.add(command);
        self
    }

    pub fn add<C: Command>(&mut self, command: C) {
        self.commands.push(Arc::new(command));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("command with an empty name")]
    EmptyName,

    #[error("duplicate command name '{0}'")]
    DuplicateName(String),

    #[error("init failed for '{name}': {reason}")]
    InitFailed { name: String, reason: String },
}

// ── Table ───────────────────────────────────────────────────────────────

/// One validated generation of the command registry.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, Arc<dyn CommandDyn>>,
    aliases: HashMap<String, String>,
    categories: BTreeMap<Category, Vec<&'static str>>,
}

impl CommandTable {
    /// Validate `set`, run initializers and collect hooks.
    pub(crate) fn build(
        set: CommandSet,
        server: &RelayServer,
    ) -> Result<(Self, HookTable), RegistryError> {
        let mut table = Self::default();
        let mut hooks = HookTable::new();
        let mut seen = HashSet::new();

        for command in set.commands {
            let info = command.info_dyn();
            if info.name.trim().is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if !seen.insert(info.name) {
                return Err(RegistryError::DuplicateName(info.name.to_string()));
            }

            command
                .init_dyn(server)
                .map_err(|e| RegistryError::InitFailed {
                    name: info.name.to_string(),
                    reason: format!("{e:#}"),
                })?;

            for hook in command.hooks_dyn() {
                hooks.add(hook);
            }
            for alias in info.aliases {
                table.aliases.insert(alias.to_string(), info.name.to_string());
            }
            table.categories.entry(info.category).or_default().push(info.name);
            table.commands.insert(info.name.to_string(), command);
        }

        for names in table.categories.values_mut() {
            names.sort_unstable();
        }
        Ok((table, hooks))
    }

    /// Exact name first, then alias.
    fn lookup(&self, name: &str) -> Option<&Arc<dyn CommandDyn>> {
        self.commands.get(name).or_else(|| {
            self.aliases
                .get(name)
                .and_then(|target| self.commands.get(target))
        })
    }

    /// Closest registered name within `max_distance` edits.
    fn suggest(&self, name: &str, max_distance: usize) -> Option<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
            .into_iter()
            .map(|candidate| (levenshtein(name, candidate), candidate))
            .filter(|(distance, _)| *distance <= max_distance)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate)
    }
}

/// Edit distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

// ── Registry ────────────────────────────────────────────────────────────

/// The live command table.
#[derive(Default)]
pub struct CommandRegistry {
    table: RwLock<Arc<CommandTable>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, table: CommandTable) {
        *self.table.write() = Arc::new(table);
    }

    fn snapshot(&self) -> Arc<CommandTable> {
        self.table.read().clone()
    }

    pub fn len(&self) -> usize {
        self.table.read().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor for a name or alias.
    pub fn get(&self, name: &str) -> Option<CommandInfo> {
        self.snapshot().lookup(name).map(|c| c.info_dyn())
    }

    /// Every descriptor, sorted by name.
    pub fn all(&self) -> Vec<CommandInfo> {
        let table = self.snapshot();
        let mut infos: Vec<CommandInfo> = table.commands.values().map(|c| c.info_dyn()).collect();
        infos.sort_by_key(|info| info.name);
        infos
    }

    /// Category → sorted command names.
    pub fn categories(&self) -> BTreeMap<Category, Vec<&'static str>> {
        self.snapshot().categories.clone()
    }

    pub fn is_internal(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|info| info.category == Category::Internal)
    }

    /// Look up `payload.cmd` and run it, replying with a notice on any failure.
    pub async fn handle(&self, server: &RelayServer, conn: &Arc<Connection>, payload: Payload) {
        let Some(cmd) = command_of(&payload).map(str::to_string) else {
            return;
        };

        let table = self.snapshot();
        let Some(command) = table.lookup(&cmd).cloned() else {
            let text = match table.suggest(&cmd, server.config().suggest_distance) {
                Some(name) => format!("Command not found, did you mean: `{name}`?"),
                None => "Unknown command".to_string(),
            };
            debug!(client_id = %conn.id(), cmd = %cmd, "unknown command");
            server.warn(conn, text);
            return;
        };
        drop(table);

        let info = command.info_dyn();
        let missing: Vec<&str> = info
            .required
            .iter()
            .copied()
            .filter(|field| !payload.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            server.warn(
                conn,
                format!("Failed to execute '{cmd}': missing required {}", missing.join(", ")),
            );
            return;
        }

        let result = AssertUnwindSafe(command.run_dyn(server, conn, payload))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:?}"),
            Err(_) => "handler panicked".to_string(),
        };
        warn!(client_id = %conn.id(), cmd = %cmd, error = %failure, "command failed");
        server.warn(conn, format!("Failed to execute '{cmd}'"));
    }
}
