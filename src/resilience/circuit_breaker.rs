//! # Circuit Breaker
//!
//! Guards the processing pipeline against a failing downstream. Closed lets
//! everything through, Open rejects, HalfOpen lets trial calls through until
//! enough of them succeed in a row.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditLogBuilder, AuditSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub max_failures: u32,
    /// Cool-down after the last failure before a trial call is let through
    pub reset_timeout: Duration,
    /// Consecutive half-open successes required to close again
    pub half_open_max_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_successes: 2,
        }
    }
}

/// Point-in-time view for the admin API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub max_failures: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            max_failures = config.max_failures,
            reset_timeout_secs = config.reset_timeout.as_secs(),
            half_open_max_successes = config.half_open_max_successes,
            "Circuit breaker initialized"
        );

        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
            audit: None,
        }
    }

    /// Report transitions to an audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether calls should be rejected right now.
    ///
    /// An Open breaker whose cool-down has elapsed flips to HalfOpen here and
    /// lets the caller through as a trial call.
    pub fn is_open(&self) -> bool {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return false,
                CircuitState::Open => {
                    let cooled_down = inner
                        .last_failure
                        .map_or(true, |at| at.elapsed() > self.config.reset_timeout);
                    if !cooled_down {
                        return true;
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    self.snapshot_of(&inner)
                }
            }
        };

        info!("Circuit breaker half-open, allowing trial call");
        self.notify(AuditAction::CircuitHalfOpen, transition);
        false
    }

    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_successes {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.half_open_successes = 0;
                        Some(self.snapshot_of(&inner))
                    } else {
                        None
                    }
                }
                CircuitState::Open => {
                    debug!("Success recorded while circuit is open");
                    None
                }
            }
        };

        if let Some(snapshot) = transition {
            info!("Circuit breaker closed");
            self.notify(AuditAction::CircuitClosed, snapshot);
        }
    }

    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.max_failures {
                        inner.state = CircuitState::Open;
                        Some(self.snapshot_of(&inner))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.failure_count += 1;
                    inner.state = CircuitState::Open;
                    inner.half_open_successes = 0;
                    Some(self.snapshot_of(&inner))
                }
                CircuitState::Open => {
                    inner.failure_count += 1;
                    None
                }
            }
        };

        if let Some(snapshot) = transition {
            warn!(
                failure_count = snapshot.failure_count,
                reset_timeout_secs = snapshot.reset_timeout_secs,
                "Circuit breaker opened"
            );
            self.notify(AuditAction::CircuitOpened, snapshot);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        self.snapshot_of(&inner)
    }

    /// Force the breaker back to Closed with clean counters
    pub fn reset(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.half_open_successes = 0;
            inner.last_failure = None;
            self.snapshot_of(&inner)
        };

        info!("Circuit breaker reset");
        self.notify(AuditAction::CircuitReset, snapshot);
    }

    fn snapshot_of(&self, inner: &Inner) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_successes: inner.half_open_successes,
            max_failures: self.config.max_failures,
            reset_timeout_secs: self.config.reset_timeout.as_secs(),
        }
    }

    fn notify(&self, action: AuditAction, snapshot: CircuitBreakerSnapshot) {
        if let Some(audit) = &self.audit {
            audit.emit(
                AuditLogBuilder::new(action)
                    .resource_type("CircuitBreaker")
                    .after_state(&snapshot),
            );
        }
    }
}
