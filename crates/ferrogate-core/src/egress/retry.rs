//! Retry orchestration
//!
//! Flat-interval retry with a hard attempt bound. Each request carries its
//! own [`RetryContext`]; nothing here is shared across requests, so one
//! misbehaving flow can never consume another flow's retry budget.

use crate::egress::error::TransportError;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// How a failure should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureClass {
    /// Worth another attempt: the upstream may simply be slow or restarting
    Retryable,
    /// No amount of retrying will help
    Terminal,
}

/// Maps transport failures to a retry decision.
pub trait FailureClassifier: Send + Sync + 'static {
    fn classify(&self, error: &TransportError) -> FailureClass;
}

/// Default classification: connectivity-shaped failures are retryable,
/// everything else is terminal.
///
/// Retryable kinds are transient by nature (timeouts, refused or dropped
/// connections, resolution hiccups, interrupted I/O, a failed TLS
/// negotiation against a restarting peer). Protocol violations and
/// unclassified I/O errors are terminal.
pub struct DefaultFailureClassifier;

impl FailureClassifier for DefaultFailureClassifier {
    fn classify(&self, error: &TransportError) -> FailureClass {
        match error {
            TransportError::ConnectTimeout
            | TransportError::TimedOut(_)
            | TransportError::Interrupted
            | TransportError::NameResolution(_)
            | TransportError::ConnectionRefused
            | TransportError::ConnectionClosed
            | TransportError::TlsHandshake(_) => FailureClass::Retryable,
            TransportError::Io(_) | TransportError::Protocol(_) | TransportError::Other(_) => {
                FailureClass::Terminal
            }
        }
    }
}

/// Retry budget and pacing
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// Additional attempts after the first (total attempts = 1 + max_retries)
    pub max_retries: u32,
    /// Flat wait between attempts, no backoff growth
    pub interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: 2,
            interval: Duration::from_secs(1),
        }
    }
}

/// Per-request attempt tracking
#[derive(Debug, Default)]
pub struct RetryContext {
    attempts: u32,
    last_class: Option<FailureClass>,
}

impl RetryContext {
    pub fn new() -> Self {
        RetryContext::default()
    }

    /// Count one attempt. Called at the top of every attempt, including
    /// the first.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Classification of the most recent failure, if any
    pub fn last_class(&self) -> Option<FailureClass> {
        self.last_class
    }
}

/// Drives retry decisions for the dispatcher
pub struct RetryOrchestrator {
    settings: RetrySettings,
    classifier: Box<dyn FailureClassifier>,
}

impl RetryOrchestrator {
    pub fn new(settings: RetrySettings) -> Self {
        Self::with_classifier(settings, Box::new(DefaultFailureClassifier))
    }

    pub fn with_classifier(settings: RetrySettings, classifier: Box<dyn FailureClassifier>) -> Self {
        RetryOrchestrator {
            settings,
            classifier,
        }
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// True iff the failure is retryable and the attempt budget is not yet
    /// spent. With `max_retries = 2`, attempts 1 and 2 may be retried and
    /// attempt 3 may not, giving three attempts in total.
    pub fn should_retry(&self, ctx: &mut RetryContext, error: &TransportError) -> bool {
        let class = self.classifier.classify(error);
        ctx.last_class = Some(class);

        let decision =
            class == FailureClass::Retryable && ctx.attempts <= self.settings.max_retries;
        debug!(
            attempts = ctx.attempts,
            class = ?class,
            retry = decision,
            "classified failed attempt"
        );
        decision
    }

    /// Decide whether a transient upstream response should be retried.
    ///
    /// Consults only the attempt budget: the upstream already declared the
    /// outcome transient, so the failure classifier has no say.
    pub fn should_retry_outcome(&self, ctx: &RetryContext) -> bool {
        ctx.attempts <= self.settings.max_retries
    }

    /// Classify an error without recording anything.
    pub fn classify(&self, error: &TransportError) -> FailureClass {
        self.classifier.classify(error)
    }

    /// Wait between attempts; constant by design of the settings.
    pub fn retry_interval(&self) -> Duration {
        self.settings.interval
    }

    pub fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn orchestrator(max_retries: u32) -> RetryOrchestrator {
        RetryOrchestrator::new(RetrySettings {
            max_retries,
            interval: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_retryable_error_within_budget() {
        let orch = orchestrator(2);
        let mut ctx = RetryContext::new();

        ctx.record_attempt();
        assert!(orch.should_retry(&mut ctx, &TransportError::ConnectTimeout));

        ctx.record_attempt();
        assert!(orch.should_retry(&mut ctx, &TransportError::ConnectionRefused));

        // Third attempt exhausts the budget
        ctx.record_attempt();
        assert!(!orch.should_retry(&mut ctx, &TransportError::ConnectTimeout));
        assert_eq!(ctx.attempts(), 3);
    }

    #[test]
    fn test_terminal_error_never_retries() {
        let orch = orchestrator(5);
        let mut ctx = RetryContext::new();

        ctx.record_attempt();
        assert!(!orch.should_retry(&mut ctx, &TransportError::Protocol("bad frame".into())));
        assert_eq!(ctx.last_class(), Some(FailureClass::Terminal));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let orch = orchestrator(0);
        let mut ctx = RetryContext::new();

        ctx.record_attempt();
        assert!(!orch.should_retry(&mut ctx, &TransportError::ConnectTimeout));
    }

    #[test]
    fn test_outcome_bound_ignores_classifier() {
        let orch = orchestrator(1);
        let mut ctx = RetryContext::new();

        ctx.record_attempt();
        assert!(orch.should_retry_outcome(&ctx));

        ctx.record_attempt();
        assert!(!orch.should_retry_outcome(&ctx));
    }

    #[test]
    fn test_default_classifier_kinds() {
        let classifier = DefaultFailureClassifier;

        let retryable = [
            TransportError::ConnectTimeout,
            TransportError::TimedOut(Duration::from_secs(5)),
            TransportError::Interrupted,
            TransportError::NameResolution("upstream.example".into()),
            TransportError::ConnectionRefused,
            TransportError::ConnectionClosed,
            TransportError::TlsHandshake("alert".into()),
        ];
        for error in &retryable {
            assert_eq!(classifier.classify(error), FailureClass::Retryable);
        }

        let terminal = [
            TransportError::Protocol("bad frame".into()),
            TransportError::Other("unknown".into()),
            TransportError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
        ];
        for error in &terminal {
            assert_eq!(classifier.classify(error), FailureClass::Terminal);
        }
    }

    #[test]
    fn test_flat_interval() {
        let orch = orchestrator(2);
        assert_eq!(orch.retry_interval(), Duration::from_millis(10));
        // Interval never grows between calls
        assert_eq!(orch.retry_interval(), orch.retry_interval());
    }
}
