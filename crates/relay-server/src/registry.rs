//! Connection registry and filter matching.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::connection::Connection;

/// How one filter field is matched against a connection attribute.
#[derive(Clone)]
pub enum Matcher {
    /// Exact equality.
    Equals(Value),
    /// Equal to any of the listed values.
    AnyOf(Vec<Value>),
    /// Arbitrary test on the attribute value.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Matcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::AnyOf(options) => options.contains(value),
            Self::Predicate(test) => test(value),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Self::AnyOf(v) => f.debug_tuple("AnyOf").field(v).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A conjunction of per-field matchers.
///
/// A connection qualifies only if it possesses every filtered field and each
/// one matches. The empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    fields: Vec<(String, Matcher)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection present in `channel`.
    pub fn in_channel(channel: &str) -> Self {
        let channel = Value::from(channel);
        Self::new().when("channels", move |v| {
            v.as_array().is_some_and(|list| list.contains(&channel))
        })
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), Matcher::Equals(value.into())));
        self
    }

    pub fn any_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.fields.push((field.into(), Matcher::AnyOf(values)));
        self
    }

    pub fn when(
        mut self,
        field: impl Into<String>,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fields.push((field.into(), Matcher::Predicate(Arc::new(test))));
        self
    }

    /// Exclude one connection by id.
    pub fn except(self, id: &str) -> Self {
        let id = Value::from(id);
        self.when("id", move |v| *v != id)
    }

    pub fn matches(&self, conn: &Connection) -> bool {
        self.fields.iter().all(|(field, matcher)| {
            conn.field(field).is_some_and(|value| matcher.matches(&value))
        })
    }
}

/// All live connections, keyed by client id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        self.connections.write().insert(conn.id().to_string(), conn);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections matching `filter`, in no particular order.
    pub fn find(&self, filter: &Filter) -> Vec<Arc<Connection>> {
        // Snapshot first so per-connection locks are never taken under the map lock.
        let all: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        all.into_iter().filter(|conn| filter.matches(conn)).collect()
    }
}
