//! Routes and the outbound connector seam

use crate::egress::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// Upstream destination, the unit of pool partitioning.
///
/// Two requests share pooled connections iff they resolve to the same route.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Upstream host name or address
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Transport scheme, e.g. "http" or "coap"
    pub scheme: String,
}

impl Route {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Route {
            host: host.into(),
            port,
            scheme: scheme.into(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Error parsing a `scheme://host:port` route string
#[derive(Error, Debug)]
#[error("invalid route '{input}': {reason}")]
pub struct RouteParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| RouteParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = s.split_once("://").ok_or_else(|| err("missing scheme"))?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| err("missing port"))?;

        if scheme.is_empty() {
            return Err(err("empty scheme"));
        }
        if host.is_empty() {
            return Err(err("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| err("invalid port"))?;

        Ok(Route::new(scheme, host, port))
    }
}

/// Pool-side bookkeeping attached to every tracked connection
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// Pool-unique connection id, stable across reuses
    pub id: u64,
    /// Route this connection serves
    pub route: Route,
    /// When the connection was opened
    pub created_at: Instant,
}

/// Opens transport connections to upstream routes.
///
/// Implemented by the protocol layer (plain TCP, TLS, a test double). The
/// pool applies its own connect timeout around `connect`, so implementations
/// do not need to bound themselves.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, route: &Route) -> Result<Self::Connection, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_display_round_trip() {
        let route = Route::new("http", "upstream.example", 8080);
        assert_eq!(route.to_string(), "http://upstream.example:8080");

        let parsed: Route = route.to_string().parse().unwrap();
        assert_eq!(parsed, route);
    }

    #[test]
    fn test_route_parse_rejects_malformed() {
        assert!("upstream.example:8080".parse::<Route>().is_err());
        assert!("http://upstream.example".parse::<Route>().is_err());
        assert!("http://:8080".parse::<Route>().is_err());
        assert!("http://host:notaport".parse::<Route>().is_err());
        assert!("://host:80".parse::<Route>().is_err());
    }

    #[test]
    fn test_routes_partition_by_all_fields() {
        let a = Route::new("http", "host", 80);
        let b = Route::new("https", "host", 80);
        let c = Route::new("http", "host", 81);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
