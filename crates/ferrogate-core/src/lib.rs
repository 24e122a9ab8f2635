//! Resource-management core of a hardened, protocol-translating forwarding
//! proxy.
//!
//! The crate bounds every resource an untrusted client can make the proxy
//! consume: upstream connections live in a capped, reusing pool; resumable
//! security sessions live in a staleness-aware bounded cache; failed upstream
//! attempts retry on a flat interval with a hard per-request budget; and each
//! inbound request is accepted immediately and resolved later through a
//! one-shot handle, so slow upstreams never pin ingress resources.
//!
//! Protocol encoding, the secure-transport handshake and process bootstrap
//! are collaborator seams ([`dispatch::Translator`],
//! [`dispatch::UpstreamTransport`], [`egress::Connector`]), not part of this
//! crate.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod egress;
pub mod session;
pub mod stats;

pub use cache::BoundedCache;
pub use config::{ConfigError, ProxyConfig};
pub use dispatch::{
    DispatchError, DispatchHandle, DispatchResult, Dispatcher, Exchange, TranslationError,
    Translator, UpstreamTransport,
};
pub use egress::{
    ConnectionPool, Connector, EgressError, PoolConfig, PooledConnection, RetryOrchestrator,
    RetrySettings, Route, TransportError,
};
pub use session::{ResumptionTicket, SessionCacheConfig, SessionId, SessionRecord, SessionStore};
pub use stats::ProxyStats;
