//! Session store for secure-transport resumption
//!
//! Holds negotiated per-peer security state so a returning peer can resume
//! without a full handshake. Backed by the staleness-aware bounded cache:
//! writes count as usage, reads never do, so only peers that actually
//! re-establish sessions keep their slots warm.

use crate::cache::BoundedCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Opaque session identifier assigned during the handshake.
///
/// An empty identifier means "no session" and is never stored.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct SessionId(Vec<u8>);

impl SessionId {
    pub fn new(bytes: Vec<u8>) -> Self {
        SessionId(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({} bytes)", self.0.len())
    }
}

impl From<&[u8]> for SessionId {
    fn from(bytes: &[u8]) -> Self {
        SessionId(bytes.to_vec())
    }
}

/// Snapshot of the security state negotiated with one peer.
///
/// Cloneable so the store can keep an independent copy; the handshake layer
/// mutating its own record afterwards never reaches back into the store.
#[derive(Clone)]
pub struct SessionRecord {
    id: SessionId,
    peer_identity: String,
    cipher_suite: u16,
    master_secret: Vec<u8>,
    established_at: SystemTime,
}

impl SessionRecord {
    pub fn new(
        id: SessionId,
        peer_identity: String,
        cipher_suite: u16,
        master_secret: Vec<u8>,
    ) -> Self {
        SessionRecord {
            id,
            peer_identity,
            cipher_suite,
            master_secret,
            established_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    pub fn cipher_suite(&self) -> u16 {
        self.cipher_suite
    }

    pub fn established_at(&self) -> SystemTime {
        self.established_at
    }

    /// Extract the minimal material needed to resume this session.
    pub fn ticket(&self) -> ResumptionTicket {
        ResumptionTicket {
            cipher_suite: self.cipher_suite,
            master_secret: self.master_secret.clone(),
        }
    }
}

// Manual Debug: the master secret must never reach the logs
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id)
            .field("peer_identity", &self.peer_identity)
            .field("cipher_suite", &self.cipher_suite)
            .field("master_secret", &"[REDACTED]")
            .field("established_at", &self.established_at)
            .finish()
    }
}

/// Resumption material handed to the handshake layer on a cache hit
#[derive(Clone, PartialEq, Eq)]
pub struct ResumptionTicket {
    cipher_suite: u16,
    master_secret: Vec<u8>,
}

impl ResumptionTicket {
    pub fn cipher_suite(&self) -> u16 {
        self.cipher_suite
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }
}

impl fmt::Debug for ResumptionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumptionTicket")
            .field("cipher_suite", &self.cipher_suite)
            .field("master_secret", &"[REDACTED]")
            .finish()
    }
}

/// Session cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Maximum number of cached sessions
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    /// Age after which an unused session becomes an eviction candidate
    #[serde(default = "default_session_staleness_secs")]
    pub staleness_secs: u64,
}

fn default_session_capacity() -> usize {
    1000
}

fn default_session_staleness_secs() -> u64 {
    60
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        SessionCacheConfig {
            capacity: default_session_capacity(),
            staleness_secs: default_session_staleness_secs(),
        }
    }
}

/// Bounded store of resumable sessions
pub struct SessionStore {
    cache: BoundedCache<SessionId, SessionRecord>,
}

impl SessionStore {
    pub fn new(config: &SessionCacheConfig) -> Self {
        SessionStore {
            cache: BoundedCache::new(
                config.capacity,
                Duration::from_secs(config.staleness_secs),
            ),
        }
    }

    /// Store a session snapshot.
    ///
    /// Records with an empty id are silently ignored. Storing clones the
    /// record, and the write refreshes the session's recency.
    pub fn put(&self, record: &SessionRecord) {
        if record.id().is_empty() {
            debug!("ignoring session with empty id");
            return;
        }
        self.cache.put(record.id().clone(), record.clone());
    }

    /// Fetch resumption material for a session id.
    ///
    /// Absence is an ordinary miss, not an error, and the lookup does not
    /// refresh the session's recency.
    pub fn get(&self, id: &SessionId) -> Option<ResumptionTicket> {
        self.cache.get(id).map(|record| record.ticket())
    }

    /// Invalidate a session immediately.
    pub fn remove(&self, id: &SessionId) {
        self.cache.remove(id);
    }

    /// Number of sessions currently cached
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Configured session capacity
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }
}
