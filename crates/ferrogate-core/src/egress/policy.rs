//! Pool behavior policies
//!
//! Small named traits replacing what would otherwise be closures buried in
//! the pool. The defaults are config-driven; tests and unusual deployments
//! can substitute their own implementations.

use std::time::Duration;

/// Decides whether released connections may be parked for reuse at all.
pub trait ReusePolicy: Send + Sync + 'static {
    fn reuse_allowed(&self) -> bool;
}

/// Static reuse switch driven by configuration
pub struct ConfiguredReuse {
    enabled: bool,
}

impl ConfiguredReuse {
    pub fn new(enabled: bool) -> Self {
        ConfiguredReuse { enabled }
    }
}

impl ReusePolicy for ConfiguredReuse {
    fn reuse_allowed(&self) -> bool {
        self.enabled
    }
}

/// Decides how long a released connection stays reusable.
pub trait KeepAlivePolicy: Send + Sync + 'static {
    /// `hint` is the upstream's advertised keep-alive, when it sent one.
    fn keep_alive_for(&self, hint: Option<Duration>) -> Duration;
}

/// Honor the upstream's keep-alive hint, fall back to the configured default.
pub struct HintedKeepAlive {
    default: Duration,
}

impl HintedKeepAlive {
    pub fn new(default: Duration) -> Self {
        HintedKeepAlive { default }
    }
}

impl KeepAlivePolicy for HintedKeepAlive {
    fn keep_alive_for(&self, hint: Option<Duration>) -> Duration {
        match hint {
            Some(advertised) => advertised,
            None => self.default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_reuse() {
        assert!(ConfiguredReuse::new(true).reuse_allowed());
        assert!(!ConfiguredReuse::new(false).reuse_allowed());
    }

    #[test]
    fn test_keep_alive_hint_wins() {
        let policy = HintedKeepAlive::new(Duration::from_secs(5));

        assert_eq!(
            policy.keep_alive_for(Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.keep_alive_for(Some(Duration::ZERO)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_keep_alive_default_without_hint() {
        let policy = HintedKeepAlive::new(Duration::from_secs(5));
        assert_eq!(policy.keep_alive_for(None), Duration::from_secs(5));
    }
}
