//! Aggregate statistics export

use crate::dispatch::DispatchStatsSnapshot;
use crate::egress::{ConnectionPool, Connector, PoolStatsSnapshot};
use crate::session::SessionStore;
use serde::Serialize;

/// Session store occupancy
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatsSnapshot {
    pub cached_sessions: usize,
    pub capacity: usize,
}

/// One aggregate view over the proxy's components, for export
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub pool: PoolStatsSnapshot,
    pub dispatch: DispatchStatsSnapshot,
    pub sessions: SessionStatsSnapshot,
}

impl ProxyStats {
    /// Collect a point-in-time snapshot from all components
    pub fn collect<C: Connector>(
        pool: &ConnectionPool<C>,
        dispatch: DispatchStatsSnapshot,
        sessions: &SessionStore,
    ) -> Self {
        ProxyStats {
            pool: pool.stats(),
            dispatch,
            sessions: SessionStatsSnapshot {
                cached_sessions: sessions.len(),
                capacity: sessions.capacity(),
            },
        }
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchStats;
    use crate::egress::{Connector, PoolConfig, Route, TransportError};
    use crate::session::{SessionCacheConfig, SessionId, SessionRecord};
    use async_trait::async_trait;

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        type Connection = ();

        async fn connect(&self, _route: &Route) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_collect_and_export() {
        let pool = ConnectionPool::new(NullConnector, PoolConfig::default());
        let sessions = SessionStore::new(&SessionCacheConfig::default());
        let dispatch = DispatchStats::default();

        sessions.put(&SessionRecord::new(
            SessionId::from(&b"s1"[..]),
            "peer".to_string(),
            1,
            b"secret".to_vec(),
        ));
        dispatch.record_received();
        dispatch.record_completed();

        let stats = ProxyStats::collect(&pool, dispatch.snapshot(), &sessions);
        assert_eq!(stats.sessions.cached_sessions, 1);
        assert_eq!(stats.sessions.capacity, 1000);
        assert_eq!(stats.dispatch.received, 1);

        let json = stats.to_json().unwrap();
        assert!(json.contains("cached_sessions"));
        assert!(json.contains("open_connections"));
    }
}
