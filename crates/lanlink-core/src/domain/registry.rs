//! Time-windowed registry of recently announced peers.
//!
//! The discovery listener calls [`PeerRegistry::refresh`] for every valid
//! presence datagram; the UI polls [`PeerRegistry::online_peers`].  Entries
//! are never removed explicitly.  A peer simply stops being listed once it
//! has been silent for longer than the expiry window, and the stale entry is
//! pruned by the next read.
//!
//! The registry is an ordinary value, not a global, so tests can create as
//! many independent instances as they like.  Every time-dependent method has
//! an `_at` twin that takes the current [`Instant`] explicitly.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::domain::peer::PeerAddress;

/// Default expiry window: a peer is listed for 10 seconds after its last
/// announcement.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(10);

/// Concurrent, expiring set of peer addresses.
#[derive(Debug)]
pub struct PeerRegistry {
    expiry: Duration,
    last_seen: Mutex<HashMap<PeerAddress, Instant>>,
}

impl PeerRegistry {
    /// Creates an empty registry with the given expiry window.
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the expiry window.
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Records that `address` was seen just now.
    pub fn refresh(&self, address: PeerAddress) {
        self.refresh_at(address, Instant::now());
    }

    /// Records that `address` was seen at `now`.
    ///
    /// A refresh never moves an entry backwards in time.
    pub fn refresh_at(&self, address: PeerAddress, now: Instant) {
        let mut entries = self.entries();
        let seen = entries.entry(address).or_insert(now);
        if now > *seen {
            *seen = now;
        }
    }

    /// Returns every address seen within the expiry window.
    ///
    /// The order of the returned addresses is unspecified.
    pub fn online_peers(&self) -> Vec<PeerAddress> {
        self.online_peers_at(Instant::now())
    }

    /// Like [`online_peers`](Self::online_peers) with an explicit clock.
    ///
    /// Entries older than the window are dropped as a side effect.
    pub fn online_peers_at(&self, now: Instant) -> Vec<PeerAddress> {
        let expiry = self.expiry;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) <= expiry);
        if entries.len() < before {
            trace!("pruned {} expired peer(s)", before - entries.len());
        }
        entries.keys().cloned().collect()
    }

    /// Returns `true` if `address` is currently within the window.
    pub fn is_online(&self, address: &PeerAddress) -> bool {
        self.is_online_at(address, Instant::now())
    }

    /// Like [`is_online`](Self::is_online) with an explicit clock.
    pub fn is_online_at(&self, address: &PeerAddress, now: Instant) -> bool {
        self.entries()
            .get(address)
            .is_some_and(|seen| now.saturating_duration_since(*seen) <= self.expiry)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PeerAddress, Instant>> {
        // Every critical section leaves the map consistent, so a panic in
        // another thread does not invalidate it.
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
