//! Failure Injection for the mock disk cache
//!
//! Supports per-call error and delay injection for testing error paths.

use std::collections::HashMap;
use std::time::Duration;

use super::CacheCall;

/// Failure configuration for one kind of call
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// Error message to fail with (if any)
    pub error_message: Option<String>,
    /// Delay to add before completing
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// A config that fails with an I/O error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A config that only adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Self::default()
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// What an injected failure resolves to for a single call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectedOutcome {
    pub delay: Option<Duration>,
    pub error_message: Option<String>,
}

/// Failure injector keyed by call kind
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<CacheCall, FailureConfig>,
    call_counts: HashMap<CacheCall, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, call: CacheCall, config: FailureConfig) {
        self.configs.insert(call, config);
        self.call_counts.insert(call, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_call(&mut self, call: CacheCall) {
        self.configs.remove(&call);
        self.call_counts.remove(&call);
    }

    /// Resolve the injected behaviour for one occurrence of `call`.
    pub fn check(&mut self, call: CacheCall) -> InjectedOutcome {
        let config = match self.configs.get(&call) {
            Some(config) => config,
            None => return InjectedOutcome::default(),
        };

        let count = self.call_counts.entry(call).or_insert(0);
        *count += 1;

        let still_failing = config.fail_count.map_or(true, |limit| *count <= limit);
        InjectedOutcome {
            delay: config.delay,
            error_message: if still_failing {
                config.error_message.clone()
            } else {
                None
            },
        }
    }
}
