//! Request dispatch
//!
//! Ties the translator, the egress pool, the retry orchestrator and the
//! upstream transport into one per-request flow. `dispatch` returns
//! immediately with a handle; the flow runs on its own task, so ingress-side
//! resources are never pinned while an upstream exchange is in flight.

use crate::egress::{
    ConnectionPool, Connector, EgressError, FailureClass, RetryContext, RetryOrchestrator, Route,
    TransportError,
};
use crate::session::SessionStore;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;

/// Inbound request could not be mapped onto an upstream request
#[derive(Error, Debug)]
#[error("translation failed: {0}")]
pub struct TranslationError(pub String);

/// Maps between the inbound protocol and the upstream protocol.
///
/// `prepare` runs once per request and fixes the upstream route; `render`
/// turns the final upstream response back into the inbound protocol's shape.
pub trait Translator: Send + Sync + 'static {
    type Inbound: Send + 'static;
    type Outbound: Send + Sync + 'static;
    type UpstreamResponse: Send + 'static;
    type Response: Send + 'static;

    fn prepare(
        &self,
        inbound: Self::Inbound,
    ) -> Result<(Route, Self::Outbound), TranslationError>;

    fn render(&self, upstream: Self::UpstreamResponse) -> Self::Response;
}

/// Result of one upstream attempt
pub struct Exchange<R> {
    pub response: R,
    /// Keep-alive the upstream advertised for the connection, if any
    pub keep_alive: Option<Duration>,
    /// Upstream answered but advised retrying (overload, service warming up)
    pub transient: bool,
}

/// Performs one request/response exchange on a pooled connection.
#[async_trait::async_trait]
pub trait UpstreamTransport<C: Send>: Send + Sync + 'static {
    type Request: Send + Sync + 'static;
    type Response: Send + 'static;

    async fn exchange(
        &self,
        conn: &mut C,
        request: &Self::Request,
    ) -> Result<Exchange<Self::Response>, TransportError>;
}

/// Terminal outcome of a dispatched request
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No egress capacity within the bounded wait
    #[error("pool exhausted for {route} after {waited_ms}ms")]
    PoolExhausted { route: Route, waited_ms: u64 },

    /// Terminal transport failure, not worth retrying
    #[error("upstream exchange failed: {0}")]
    Transport(TransportError),

    /// Retryable failures persisted through the whole attempt budget
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    /// The caller's overall deadline elapsed before completion
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The inbound request could not be translated
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// The dispatch task went away without reporting an outcome
    #[error("request abandoned before completion")]
    Abandoned,
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Lifecycle of one dispatched request, for flow logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    AwaitingEgress,
    Attempting,
    Retrying,
    Completed,
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "RECEIVED",
            RequestState::AwaitingEgress => "AWAITING_EGRESS",
            RequestState::Attempting => "ATTEMPTING",
            RequestState::Retrying => "RETRYING",
            RequestState::Completed => "COMPLETED",
            RequestState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Awaitable outcome of a dispatched request.
///
/// The outcome is delivered exactly once; dropping the handle abandons the
/// observation but not the flow itself, which still runs to completion and
/// returns its connection to the pool.
pub struct DispatchHandle<R> {
    rx: oneshot::Receiver<DispatchResult<R>>,
}

impl<R> DispatchHandle<R> {
    pub async fn outcome(self) -> DispatchResult<R> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(DispatchError::Abandoned))
    }
}

/// Request counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl DispatchStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of request counters
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Per-request orchestration over pool, translator, transport and retry.
pub struct Dispatcher<Cn, T, X>
where
    Cn: Connector,
    T: Translator,
    X: UpstreamTransport<Cn::Connection, Request = T::Outbound, Response = T::UpstreamResponse>,
{
    pool: Arc<ConnectionPool<Cn>>,
    translator: Arc<T>,
    transport: Arc<X>,
    retry: Arc<RetryOrchestrator>,
    sessions: Arc<SessionStore>,
    request_timeout: Duration,
    stats: Arc<DispatchStats>,
}

impl<Cn, T, X> Dispatcher<Cn, T, X>
where
    Cn: Connector,
    Cn::Connection: Send,
    T: Translator,
    X: UpstreamTransport<Cn::Connection, Request = T::Outbound, Response = T::UpstreamResponse>,
{
    pub fn new(
        pool: Arc<ConnectionPool<Cn>>,
        translator: Arc<T>,
        transport: Arc<X>,
        retry: RetryOrchestrator,
        sessions: Arc<SessionStore>,
        request_timeout: Duration,
    ) -> Self {
        Dispatcher {
            pool,
            translator,
            transport,
            retry: Arc::new(retry),
            sessions,
            request_timeout,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Session store shared with the secure-transport collaborator
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<Cn>> {
        &self.pool
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Accept a request and return immediately with its outcome handle.
    ///
    /// The flow runs on its own task. With a `deadline`, the whole flow is
    /// abandoned once it elapses; the connection guard's drop then frees the
    /// pool capacity, and the handle resolves to `DeadlineExceeded`.
    pub fn dispatch(
        &self,
        inbound: T::Inbound,
        deadline: Option<Duration>,
    ) -> DispatchHandle<T::Response> {
        self.stats.record_received();
        debug!(state = %RequestState::Received, "request accepted");

        let (tx, rx) = oneshot::channel();
        let pool = Arc::clone(&self.pool);
        let translator = Arc::clone(&self.translator);
        let transport = Arc::clone(&self.transport);
        let retry = Arc::clone(&self.retry);
        let stats = Arc::clone(&self.stats);
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            let flow = run_flow::<Cn, T, X>(
                pool,
                translator,
                transport,
                retry,
                stats.clone(),
                request_timeout,
                inbound,
            );

            let result = match deadline {
                Some(limit) => match time::timeout(limit, flow).await {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => Err(DispatchError::DeadlineExceeded),
                },
                None => flow.await,
            };

            match &result {
                Ok(_) => {
                    stats.record_completed();
                    debug!(state = %RequestState::Completed, "request completed");
                }
                Err(error) => {
                    stats.record_failed();
                    debug!(state = %RequestState::Failed, error = %error, "request failed");
                }
            }
            // Receiver may have been dropped; the outcome is simply unobserved
            let _ = tx.send(result);
        });

        DispatchHandle { rx }
    }
}

/// One request flow: translate, then attempt-with-retries until an outcome.
async fn run_flow<Cn, T, X>(
    pool: Arc<ConnectionPool<Cn>>,
    translator: Arc<T>,
    transport: Arc<X>,
    retry: Arc<RetryOrchestrator>,
    stats: Arc<DispatchStats>,
    request_timeout: Duration,
    inbound: T::Inbound,
) -> DispatchResult<T::Response>
where
    Cn: Connector,
    Cn::Connection: Send,
    T: Translator,
    X: UpstreamTransport<Cn::Connection, Request = T::Outbound, Response = T::UpstreamResponse>,
{
    let (route, outbound) = translator.prepare(inbound)?;
    let mut ctx = RetryContext::new();

    loop {
        ctx.record_attempt();
        debug!(state = %RequestState::AwaitingEgress, route = %route, attempt = ctx.attempts(), "acquiring connection");

        let mut conn = match pool.acquire(&route).await {
            Ok(conn) => conn,
            Err(EgressError::PoolExhausted { route, waited_ms }) => {
                // Exhaustion is a capacity decision, never retried
                return Err(DispatchError::PoolExhausted { route, waited_ms });
            }
            Err(EgressError::Connect { source, .. }) => {
                if retry.should_retry(&mut ctx, &source) {
                    stats.record_retry();
                    debug!(state = %RequestState::Retrying, attempt = ctx.attempts(), error = %source, "connect failed, retrying");
                    time::sleep(retry.retry_interval()).await;
                    continue;
                }
                return Err(finalize_failure(&retry, &ctx, source));
            }
        };

        debug!(state = %RequestState::Attempting, conn_id = conn.meta().id, attempt = ctx.attempts(), "exchanging with upstream");

        let attempt = time::timeout(request_timeout, transport.exchange(&mut conn, &outbound));
        let outcome = match attempt.await {
            Ok(result) => result,
            Err(_elapsed) => Err(TransportError::TimedOut(request_timeout)),
        };

        match outcome {
            Ok(exchange) => {
                let Exchange {
                    response,
                    keep_alive,
                    transient,
                } = exchange;
                conn.release(keep_alive);

                if transient && retry.should_retry_outcome(&ctx) {
                    stats.record_retry();
                    debug!(state = %RequestState::Retrying, attempt = ctx.attempts(), "transient upstream response, retrying");
                    time::sleep(retry.retry_interval()).await;
                    continue;
                }
                // Either a final response, or the budget is spent and the
                // last transient response is what the client gets
                return Ok(translator.render(response));
            }
            Err(error) => {
                // Connection state is unknown after a failed exchange;
                // dropping the guard closes it and frees capacity
                drop(conn);

                if retry.should_retry(&mut ctx, &error) {
                    stats.record_retry();
                    debug!(state = %RequestState::Retrying, attempt = ctx.attempts(), error = %error, "attempt failed, retrying");
                    time::sleep(retry.retry_interval()).await;
                    continue;
                }
                return Err(finalize_failure(&retry, &ctx, error));
            }
        }
    }
}

/// Distinguish "gave up on a retryable failure" from "failure was terminal"
fn finalize_failure(
    retry: &RetryOrchestrator,
    ctx: &RetryContext,
    error: TransportError,
) -> DispatchError {
    match retry.classify(&error) {
        FailureClass::Retryable => DispatchError::RetriesExhausted {
            attempts: ctx.attempts(),
            last: error,
        },
        FailureClass::Terminal => DispatchError::Transport(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_state_display() {
        assert_eq!(RequestState::AwaitingEgress.to_string(), "AWAITING_EGRESS");
        assert_eq!(RequestState::Completed.to_string(), "COMPLETED");
    }

    #[tokio::test]
    async fn test_handle_reports_abandoned_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<DispatchResult<u32>>();
        drop(tx);

        let handle = DispatchHandle { rx };
        assert!(matches!(
            handle.outcome().await,
            Err(DispatchError::Abandoned)
        ));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = DispatchStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_completed();
        stats.record_failed();
        stats.record_retry();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retries, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"received\":2"));
    }
}
