//! Circuit breaker for downstream agent resilience.
//!
//! One breaker guards one downstream service name. A failing agent is cut
//! off after `failure_threshold` consecutive failures so callers fail fast
//! instead of piling up on timeouts.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │ failures │ (reject) │ recovery │  (probe) │       │
//! │      └──────────┘          └──────────┘  timeout └──────────┘       │
//! │            ▲                     ▲                     │            │
//! │            │                     └──── any failure ────┤            │
//! │            └────────── success_threshold successes ────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call admitted by [`CircuitBreaker::execute`] resolves to exactly one
//! recorded outcome. A timeout drops (cancels) the wrapped future and is
//! recorded as a single failure. Outcomes of calls that finish after the
//! breaker opened are counted but do not move the recovery deadline.

use crate::domain::config::humantime_serde;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mesh_telemetry::{names, MetricUnit, MetricsSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open,
    /// Probing recovery - requests pass and are counted
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding used for the breaker-state metric.
    #[must_use]
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Time spent open before probing
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Hard deadline for each wrapped call
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Enable circuit breaker
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// Failure of a call made through a breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit breaker for {service} is open (retry after {retry_after:?})")]
    Open { service: String, retry_after: Duration },

    /// The operation did not finish within the call timeout.
    #[error("call to {service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

/// Health snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub enabled: bool,
}

struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures while closed
    failure_count: u32,
    /// Consecutive successes while half-open
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_time: None,
            last_success_time: None,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// Breaker protecting a single downstream service.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            metrics: None,
        }
    }

    /// Emit state changes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call made now would be admitted.
    ///
    /// Read-only: counters and state are left alone. An open breaker whose
    /// recovery timeout has elapsed reports true but stays open until
    /// [`execute`](Self::execute) admits the next call.
    pub fn should_attempt_call(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => inner
                .opened_at
                .map_or(true, |t| t.elapsed() >= self.config.recovery_timeout),
        }
    }

    /// Admit a call, or return the time left before the breaker probes again.
    ///
    /// Counts the call (or rejection) and moves an open breaker whose
    /// recovery timeout has elapsed to half-open.
    fn admit(&self) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }

        let transitioned = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => {
                    inner.total_calls += 1;
                    false
                }
                CircuitState::Open => {
                    let elapsed = inner.opened_at.map_or(self.config.recovery_timeout, |t| t.elapsed());
                    if elapsed < self.config.recovery_timeout {
                        inner.total_rejections += 1;
                        let remaining = self.config.recovery_timeout - elapsed;
                        debug!(
                            service = %self.service_name,
                            remaining_ms = remaining.as_millis() as u64,
                            "Circuit breaker is open, rejecting call"
                        );
                        return Err(remaining);
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.total_calls += 1;
                    true
                }
            }
        };

        if transitioned {
            info!(service = %self.service_name, "Circuit breaker transitioning to half-open");
            self.emit_state(CircuitState::HalfOpen);
        }
        Ok(())
    }

    /// Run `operation` through the breaker under the call timeout.
    ///
    /// # Errors
    ///
    /// - `BreakerError::Open` if the breaker rejects the call; `operation`
    ///   is not polled.
    /// - `BreakerError::Timeout` if the deadline passes; `operation` is dropped.
    /// - `BreakerError::Inner` with the operation's own error.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.execute_with_timeout(self.config.call_timeout, operation)
            .await
    }

    /// [`execute`](Self::execute) with a caller-chosen deadline.
    pub async fn execute_with_timeout<F, T, E>(
        &self,
        deadline: Duration,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.admit() {
            return Err(BreakerError::Open {
                service: self.service_name.clone(),
                retry_after,
            });
        }

        match tokio::time::timeout(deadline, operation).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                warn!(
                    service = %self.service_name,
                    timeout_ms = deadline.as_millis() as u64,
                    "Call timed out"
                );
                self.record_failure();
                Err(BreakerError::Timeout {
                    service: self.service_name.clone(),
                    after: deadline,
                })
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        if !self.config.enabled {
            return;
        }

        let closed = {
            let mut inner = self.inner.lock();
            inner.last_success_time = Some(Utc::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    false
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.opened_at = None;
                        true
                    } else {
                        false
                    }
                }
                // A call admitted before the breaker opened finished late.
                CircuitState::Open => false,
            }
        };

        if closed {
            info!(service = %self.service_name, "Circuit breaker closing after successful probes");
            self.emit_state(CircuitState::Closed);
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }

        let opened = {
            let mut inner = self.inner.lock();
            inner.total_failures += 1;
            inner.last_failure_time = Some(Utc::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        Some(inner.failure_count)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.success_count = 0;
                    Some(inner.failure_count)
                }
                // A call admitted before the breaker opened failed late; the
                // recovery window still runs from the original opening.
                CircuitState::Open => None,
            }
        };

        if let Some(failures) = opened {
            warn!(
                service = %self.service_name,
                failures = failures,
                threshold = self.config.failure_threshold,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opening"
            );
            self.emit_state(CircuitState::Open);
        }
    }

    /// Force the breaker closed with zero counters.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.opened_at = None;
        }
        info!(service = %self.service_name, "Circuit breaker manually reset");
        self.emit_state(CircuitState::Closed);
    }

    /// Snapshot for health reporting.
    pub fn get_status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            service_name: self.service_name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            enabled: self.config.enabled,
        }
    }

    fn emit_state(&self, state: CircuitState) {
        if let Some(metrics) = &self.metrics {
            let label = state.to_string();
            metrics.emit_metric(
                names::BREAKER_STATE,
                state.gauge_value(),
                MetricUnit::Value,
                &[("service", self.service_name.as_str()), ("state", label.as_str())],
                None,
            );
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service_name", &self.service_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Lazily created breakers, one per service name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            metrics: None,
        }
    }

    /// Breakers created from now on emit state changes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Breaker for `service`, created on first use.
    pub fn get_or_create(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let breaker = CircuitBreaker::new(service, self.config.clone());
                Arc::new(match &self.metrics {
                    Some(metrics) => breaker.with_metrics(metrics.clone()),
                    None => breaker,
                })
            })
            .clone()
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| b.clone())
    }

    /// Status of every breaker, sorted by service name.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let mut statuses: Vec<_> = self.breakers.iter().map(|b| b.get_status()).collect();
        statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        statuses
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
