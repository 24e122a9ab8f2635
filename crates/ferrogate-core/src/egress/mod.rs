//! Upstream egress: routes, the bounded connection pool, and retry
//!
//! Everything that touches outbound capacity lives here. The pool caps open
//! upstream connections and reuses them FIFO within their keep-alive window;
//! the retry orchestrator paces re-attempts at a flat interval with a hard
//! per-request budget.

pub mod connection;
pub mod error;
pub mod policy;
pub mod pool;
pub mod retry;

pub use connection::{ConnectionMeta, Connector, Route, RouteParseError};
pub use error::{EgressError, EgressResult, TransportError};
pub use policy::{ConfiguredReuse, HintedKeepAlive, KeepAlivePolicy, ReusePolicy};
pub use pool::{ConnectionPool, PoolConfig, PoolStatsSnapshot, PooledConnection};
pub use retry::{
    DefaultFailureClassifier, FailureClass, FailureClassifier, RetryContext, RetryOrchestrator,
    RetrySettings,
};
