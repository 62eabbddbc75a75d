//! Live privilege authority and trip derivation.

use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use relay_protocol::levels::{self, Level};
use sha2::{Digest, Sha256};

/// Number of characters kept from a derived trip.
pub const TRIP_LEN: usize = 6;

/// Source of truth for who currently holds elevated rights.
pub trait Authority: Send + Sync {
    fn is_admin(&self, trip: &str) -> bool;
    fn is_moderator(&self, trip: &str) -> bool;

    /// Level granted to `trip` right now.
    fn level_for(&self, trip: Option<&str>) -> Level {
        match trip {
            Some(trip) if self.is_admin(trip) => levels::ADMIN,
            Some(trip) if self.is_moderator(trip) => levels::MODERATOR,
            _ => levels::DEFAULT,
        }
    }
}

#[derive(Debug, Default)]
struct RosterInner {
    admin: Option<String>,
    moderators: HashSet<String>,
}

/// In-memory roster: one admin trip plus a moderator set.
#[derive(Debug, Default)]
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    pub fn new(admin: Option<String>, moderators: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: RwLock::new(RosterInner {
                admin: admin.filter(|trip| !trip.is_empty()),
                moderators: moderators.into_iter().filter(|t| !t.is_empty()).collect(),
            }),
        }
    }

    /// Returns false when the trip was already a moderator.
    pub fn add_moderator(&self, trip: impl Into<String>) -> bool {
        self.inner.write().moderators.insert(trip.into())
    }

    pub fn remove_moderator(&self, trip: &str) -> bool {
        self.inner.write().moderators.remove(trip)
    }
}

impl Authority for Roster {
    fn is_admin(&self, trip: &str) -> bool {
        self.inner.read().admin.as_deref() == Some(trip)
    }

    fn is_moderator(&self, trip: &str) -> bool {
        self.inner.read().moderators.contains(trip)
    }
}

/// Derive the public trip code for a password.
pub fn hash_trip(password: &str, salt: &str) -> String {
    let mut sha = Sha256::new();
    sha.update(password.as_bytes());
    sha.update(salt.as_bytes());
    let mut trip = STANDARD.encode(sha.finalize());
    trip.truncate(TRIP_LEN);
    trip
}
