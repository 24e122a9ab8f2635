//! Bounded egress connection pool
//!
//! Enforces a hard cap on open upstream connections, per route and overall,
//! so a flood of inbound requests translates into bounded upstream load.
//! Released connections are parked for FIFO reuse within their keep-alive
//! window; acquirers that find the pool full wait a bounded time for a
//! connection to free up and then fail with `PoolExhausted`.

use crate::egress::connection::{ConnectionMeta, Connector, Route};
use crate::egress::error::{EgressError, EgressResult, TransportError};
use crate::egress::policy::{ConfiguredReuse, HintedKeepAlive, KeepAlivePolicy, ReusePolicy};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, warn};

/// Pool sizing and timing knobs, handed in by the configuration layer
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on open connections, per route and in total. 0 disables pooling:
    /// every acquire opens a fresh untracked connection.
    pub max_connections: usize,
    /// Whether released connections may be parked for reuse
    pub reuse_connections: bool,
    /// Keep-alive applied when the upstream gives no hint
    pub keep_alive: Duration,
    /// Bound on how long an acquirer waits for a free connection
    pub acquire_timeout: Duration,
    /// Bound applied around every connector call
    pub connect_timeout: Duration,
    /// Idle connections older than this are closed by the sweeper even if
    /// their keep-alive window is still open
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connections: 25,
            reuse_connections: true,
            keep_alive: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(10_000),
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Parked connection awaiting reuse
struct IdleConn<C> {
    conn: C,
    meta: ConnectionMeta,
    parked_at: Instant,
    expires_at: Instant,
}

impl<C> IdleConn<C> {
    fn expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now >= self.expires_at || now.duration_since(self.parked_at) >= idle_timeout
    }
}

/// Per-route accounting: all open connections (in use + idle) plus the
/// FIFO queue of parked ones
struct RouteState<C> {
    live: usize,
    idle: VecDeque<IdleConn<C>>,
}

impl<C> RouteState<C> {
    fn new() -> Self {
        RouteState {
            live: 0,
            idle: VecDeque::new(),
        }
    }
}

/// What an acquirer found under the lock
enum Checkout<C> {
    /// A fresh-enough idle connection was parked for this route
    Reused(C, ConnectionMeta),
    /// Capacity was reserved; the caller must open the connection
    Reserved,
    /// No idle connection and no capacity
    Full,
}

struct PoolCore<C: Connector> {
    connector: C,
    routes: DashMap<Route, Arc<Mutex<RouteState<C::Connection>>>>,
    /// Open connections across all routes, bounded by `max_connections`
    total: AtomicUsize,
    /// Woken whenever capacity frees up or an idle connection is parked
    available: Notify,
    next_id: AtomicU64,
    config: PoolConfig,
    reuse: Arc<dyn ReusePolicy>,
    keep_alive: Arc<dyn KeepAlivePolicy>,
    stats: PoolStats,
    sweeper_running: AtomicBool,
}

impl<C: Connector> PoolCore<C> {
    fn route_state(&self, route: &Route) -> Arc<Mutex<RouteState<C::Connection>>> {
        self.routes
            .entry(route.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RouteState::new())))
            .clone()
    }

    fn new_meta(&self, route: &Route) -> ConnectionMeta {
        ConnectionMeta {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            route: route.clone(),
            created_at: Instant::now(),
        }
    }

    /// One pass under the route lock: purge expired idles, then reuse or
    /// reserve capacity.
    fn try_checkout(&self, route: &Route) -> Checkout<C::Connection> {
        let state_arc = self.route_state(route);
        let now = Instant::now();
        let cap = self.config.max_connections;

        let mut purged = Vec::new();
        let outcome = {
            let mut state = state_arc.lock().unwrap();

            // FIFO: the head is the longest-parked connection. Expired heads
            // are discarded until a fresh one (or nothing) remains.
            while state
                .idle
                .front()
                .map_or(false, |front| front.expired(now, self.config.idle_timeout))
            {
                if let Some(dead) = state.idle.pop_front() {
                    state.live -= 1;
                    self.total.fetch_sub(1, Ordering::SeqCst);
                    purged.push(dead);
                }
            }

            if let Some(idle) = state.idle.pop_front() {
                Checkout::Reused(idle.conn, idle.meta)
            } else if state.live < cap && self.reserve_total(cap) {
                state.live += 1;
                Checkout::Reserved
            } else {
                Checkout::Full
            }
        };

        if !purged.is_empty() {
            self.stats.record_closed_n(purged.len() as u64);
            debug!(route = %route, closed = purged.len(), "discarded expired idle connections");
            drop(purged);
            self.available.notify_waiters();
        }

        outcome
    }

    /// Claim one slot of global capacity if any remains
    fn reserve_total(&self, cap: usize) -> bool {
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                if t < cap {
                    Some(t + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Roll back a reservation whose connect attempt failed
    fn unreserve(&self, route: &Route) {
        let state_arc = self.route_state(route);
        {
            let mut state = state_arc.lock().unwrap();
            state.live -= 1;
        }
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    /// Park a released connection for reuse
    fn park(&self, conn: C::Connection, meta: ConnectionMeta, keep_alive: Duration) {
        let now = Instant::now();
        let route = meta.route.clone();
        let state_arc = self.route_state(&route);
        {
            let mut state = state_arc.lock().unwrap();
            state.idle.push_back(IdleConn {
                conn,
                meta,
                parked_at: now,
                expires_at: now + keep_alive,
            });
        }
        debug!(route = %route, keep_alive_ms = keep_alive.as_millis() as u64, "parked connection for reuse");
        self.available.notify_waiters();
    }

    /// Close a tracked connection and free its capacity
    fn discard(&self, route: &Route) {
        let state_arc = self.route_state(route);
        {
            let mut state = state_arc.lock().unwrap();
            state.live -= 1;
        }
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.stats.record_closed_n(1);
        self.available.notify_waiters();
    }

    /// Close idle connections past their keep-alive or idle bound
    fn sweep(&self) {
        let now = Instant::now();
        let mut swept = 0usize;

        for entry in self.routes.iter() {
            let mut dead = Vec::new();
            {
                let mut state = entry.value().lock().unwrap();
                let mut kept = VecDeque::with_capacity(state.idle.len());
                while let Some(idle) = state.idle.pop_front() {
                    if idle.expired(now, self.config.idle_timeout) {
                        state.live -= 1;
                        self.total.fetch_sub(1, Ordering::SeqCst);
                        dead.push(idle);
                    } else {
                        kept.push_back(idle);
                    }
                }
                state.idle = kept;
            }
            swept += dead.len();
            drop(dead);
        }

        if swept > 0 {
            self.stats.record_closed_n(swept as u64);
            debug!(closed = swept, "idle sweep completed");
            self.available.notify_waiters();
        }
    }

    fn idle_connections(&self) -> usize {
        self.routes
            .iter()
            .map(|entry| entry.value().lock().unwrap().idle.len())
            .sum()
    }
}

/// Bounded, reusing connection pool over a [`Connector`]
pub struct ConnectionPool<C: Connector> {
    core: Arc<PoolCore<C>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool with config-driven reuse and keep-alive policies.
    ///
    /// Starts a background sweeper that closes idle connections past their
    /// keep-alive window or the idle timeout.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let reuse: Arc<dyn ReusePolicy> = Arc::new(ConfiguredReuse::new(config.reuse_connections));
        let keep_alive: Arc<dyn KeepAlivePolicy> = Arc::new(HintedKeepAlive::new(config.keep_alive));
        Self::new_internal(connector, config, reuse, keep_alive, true)
    }

    /// Create a pool with caller-supplied policies.
    pub fn with_policies(
        connector: C,
        config: PoolConfig,
        reuse: Arc<dyn ReusePolicy>,
        keep_alive: Arc<dyn KeepAlivePolicy>,
    ) -> Self {
        Self::new_internal(connector, config, reuse, keep_alive, true)
    }

    /// Create a pool without the background sweeper (for testing)
    #[cfg(test)]
    pub(crate) fn new_no_background(connector: C, config: PoolConfig) -> Self {
        let reuse: Arc<dyn ReusePolicy> = Arc::new(ConfiguredReuse::new(config.reuse_connections));
        let keep_alive: Arc<dyn KeepAlivePolicy> = Arc::new(HintedKeepAlive::new(config.keep_alive));
        Self::new_internal(connector, config, reuse, keep_alive, false)
    }

    fn new_internal(
        connector: C,
        config: PoolConfig,
        reuse: Arc<dyn ReusePolicy>,
        keep_alive: Arc<dyn KeepAlivePolicy>,
        start_background: bool,
    ) -> Self {
        let core = Arc::new(PoolCore {
            connector,
            routes: DashMap::new(),
            total: AtomicUsize::new(0),
            available: Notify::new(),
            next_id: AtomicU64::new(1),
            config,
            reuse,
            keep_alive,
            stats: PoolStats::default(),
            sweeper_running: AtomicBool::new(start_background),
        });

        if start_background {
            let sweeper = Arc::clone(&core);
            let sweep_interval = sweeper.config.idle_timeout / 4;
            tokio::spawn(async move {
                let mut interval = time::interval(sweep_interval.max(Duration::from_millis(250)));
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

                while sweeper.sweeper_running.load(Ordering::Relaxed) {
                    interval.tick().await;
                    sweeper.sweep();
                }

                debug!("pool sweeper stopped");
            });
        }

        ConnectionPool { core }
    }

    /// Check out a connection for `route`.
    ///
    /// Reuses the longest-parked fresh idle connection when one exists,
    /// opens a new one while under the cap, and otherwise waits up to the
    /// acquire timeout for capacity. Cap checks run under the route lock,
    /// so concurrent acquirers can never overshoot.
    pub async fn acquire(&self, route: &Route) -> EgressResult<PooledConnection<C>> {
        let core = &self.core;

        if core.config.max_connections == 0 {
            // Pooling disabled: fresh untracked connection per request
            let conn = self.open(route).await?;
            return Ok(PooledConnection {
                conn: Some(conn),
                meta: core.new_meta(route),
                core: Arc::clone(core),
                tracked: false,
            });
        }

        let deadline = time::Instant::now() + core.config.acquire_timeout;

        loop {
            // Register for wakeups before inspecting state, so a release
            // landing between the check and the wait is not lost
            let notified = core.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match core.try_checkout(route) {
                Checkout::Reused(conn, meta) => {
                    core.stats.record_reused();
                    debug!(route = %route, conn_id = meta.id, "reusing pooled connection");
                    return Ok(PooledConnection {
                        conn: Some(conn),
                        meta,
                        core: Arc::clone(core),
                        tracked: true,
                    });
                }
                Checkout::Reserved => match self.open(route).await {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            conn: Some(conn),
                            meta: core.new_meta(route),
                            core: Arc::clone(core),
                            tracked: true,
                        });
                    }
                    Err(error) => {
                        core.unreserve(route);
                        return Err(error);
                    }
                },
                Checkout::Full => {
                    if time::timeout_at(deadline, notified.as_mut()).await.is_err() {
                        core.stats.record_acquire_timeout();
                        warn!(route = %route, waited_ms = core.config.acquire_timeout.as_millis() as u64, "pool exhausted");
                        return Err(EgressError::PoolExhausted {
                            route: route.clone(),
                            waited_ms: core.config.acquire_timeout.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    /// Open a new connection under the connect timeout
    async fn open(&self, route: &Route) -> EgressResult<C::Connection> {
        let core = &self.core;
        let attempt = time::timeout(core.config.connect_timeout, core.connector.connect(route));

        match attempt.await {
            Ok(Ok(conn)) => {
                core.stats.record_opened();
                debug!(route = %route, "opened upstream connection");
                Ok(conn)
            }
            Ok(Err(source)) => {
                core.stats.record_connect_failure();
                Err(EgressError::Connect {
                    route: route.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                core.stats.record_connect_failure();
                Err(EgressError::Connect {
                    route: route.clone(),
                    source: TransportError::ConnectTimeout,
                })
            }
        }
    }

    /// Open connections across all routes
    pub fn open_connections(&self) -> usize {
        self.core.total.load(Ordering::SeqCst)
    }

    /// Parked connections across all routes
    pub fn idle_connections(&self) -> usize {
        self.core.idle_connections()
    }

    /// Counter snapshot for export
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.core.stats.snapshot(self.open_connections(), self.idle_connections())
    }
}

impl<C: Connector> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        self.core.sweeper_running.store(false, Ordering::Relaxed);
    }
}

/// RAII guard over a checked-out connection.
///
/// `release` hands the connection back for reuse; dropping the guard
/// without releasing (cancellation, errors mid-exchange) closes the
/// connection and frees its capacity either way.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    meta: ConnectionMeta,
    core: Arc<PoolCore<C>>,
    tracked: bool,
}

impl<C: Connector> PooledConnection<C> {
    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    /// Return the connection to the pool.
    ///
    /// `keep_alive_hint` is the upstream's advertised keep-alive, if any;
    /// the pool's keep-alive policy decides the actual parking window. The
    /// connection is closed instead when reuse is disabled, the window is
    /// zero, or it was never tracked (cap 0).
    pub fn release(mut self, keep_alive_hint: Option<Duration>) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if !self.tracked {
            drop(conn);
            return;
        }

        let window = self.core.keep_alive.keep_alive_for(keep_alive_hint);
        if self.core.reuse.reuse_allowed() && window > Duration::ZERO {
            let meta = self.meta.clone();
            self.core.park(conn, meta, window);
        } else {
            drop(conn);
            self.core.discard(&self.meta.route);
        }
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().unwrap()
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            if self.tracked {
                debug!(route = %self.meta.route, conn_id = self.meta.id, "connection dropped without release");
                self.core.discard(&self.meta.route);
            }
        }
    }
}

/// Pool activity counters
#[derive(Debug, Default)]
pub struct PoolStats {
    opened: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
    connect_failures: AtomicU64,
    acquire_timeouts: AtomicU64,
}

impl PoolStats {
    pub fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed_n(&self, n: u64) {
        self.closed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquire_timeout(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, open: usize, idle: usize) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            open_connections: open,
            idle_connections: idle,
        }
    }
}

/// Point-in-time view of pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsSnapshot {
    pub opened: u64,
    pub reused: u64,
    pub closed: u64,
    pub connect_failures: u64,
    pub acquire_timeouts: u64,
    pub open_connections: usize,
    pub idle_connections: usize,
}
