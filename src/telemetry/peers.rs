//! Per-peer traffic accounting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the peer update channel. Slow subscribers see `Lagged`.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Receives byte counts for traffic exchanged with a peer.
///
/// "Received" is traffic read from the peer, "sent" is traffic written to it.
pub trait TrafficObserver: Send + Sync {
    /// `bytes` were read from `peer`.
    fn bytes_received(&self, peer: &str, bytes: u64);

    /// `bytes` were written to `peer`.
    fn bytes_sent(&self, peer: &str, bytes: u64);
}

/// Observer that discards every count.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrafficObserver for NoopObserver {
    fn bytes_received(&self, _peer: &str, _bytes: u64) {}

    fn bytes_sent(&self, _peer: &str, _bytes: u64) {}
}

/// Running totals for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    /// Peer address (IP only).
    pub ip: String,
    /// Bytes read from the peer.
    pub bytes_up: u64,
    /// Bytes written to the peer.
    pub bytes_dn: u64,
    /// Time of the most recent traffic.
    pub last_seen: DateTime<Utc>,
}

/// Update published whenever a peer's totals change.
///
/// Serializes as `{"type":"peer","data":{...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PeerUpdate {
    /// New totals for a peer.
    Peer(PeerSnapshot),
}

impl PeerUpdate {
    /// Encode the update as a single JSON message.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// In-memory table of per-peer totals.
///
/// Every change is published to subscribers; a new subscriber first receives
/// a snapshot of all known peers.
pub struct PeerStats {
    peers: Mutex<HashMap<String, PeerSnapshot>>,
    updates: broadcast::Sender<PeerUpdate>,
}

impl PeerStats {
    /// Create an empty table.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            peers: Mutex::new(HashMap::new()),
            updates,
        }
    }

    /// Current totals for a peer, if it has been seen.
    pub fn get(&self, peer: &str) -> Option<PeerSnapshot> {
        self.lock().get(peer).cloned()
    }

    /// Current totals for every known peer.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.lock().values().cloned().collect()
    }

    /// Number of peers seen.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no peer has been seen.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Subscribe to updates.
    ///
    /// Returns one update per currently known peer, plus a receiver for
    /// everything after. Both are taken under the table lock so no update
    /// falls between them.
    pub fn subscribe(&self) -> (Vec<PeerUpdate>, broadcast::Receiver<PeerUpdate>) {
        let peers = self.lock();
        let receiver = self.updates.subscribe();
        let hello = peers.values().cloned().map(PeerUpdate::Peer).collect();
        (hello, receiver)
    }

    fn record(&self, peer: &str, up: u64, down: u64) {
        let mut peers = self.lock();
        let entry = peers.entry(peer.to_string()).or_insert_with(|| PeerSnapshot {
            ip: peer.to_string(),
            bytes_up: 0,
            bytes_dn: 0,
            last_seen: Utc::now(),
        });
        entry.bytes_up = entry.bytes_up.saturating_add(up);
        entry.bytes_dn = entry.bytes_dn.saturating_add(down);
        entry.last_seen = Utc::now();

        trace!(
            "Peer {} totals: up={} down={}",
            peer, entry.bytes_up, entry.bytes_dn
        );

        // No subscribers is fine.
        let _ = self.updates.send(PeerUpdate::Peer(entry.clone()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PeerSnapshot>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PeerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficObserver for PeerStats {
    fn bytes_received(&self, peer: &str, bytes: u64) {
        self.record(peer, bytes, 0);
    }

    fn bytes_sent(&self, peer: &str, bytes: u64) {
        self.record(peer, 0, bytes);
    }
}

impl std::fmt::Debug for PeerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStats")
            .field("peers", &self.len())
            .field("subscribers", &self.updates.receiver_count())
            .finish()
    }
}
