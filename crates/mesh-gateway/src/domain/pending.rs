//! Pending result store.
//!
//! Bridges the ack-then-callback protocol back into a single awaitable call:
//! `call_tool_and_wait` registers the outbound `trace_id`, the serve loop
//! completes it when the matching callback arrives.

use dashmap::DashMap;
use mesh_types::CallOutcome;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A callback outcome delivered to a waiting caller.
#[derive(Debug)]
pub struct CompletedCall {
    /// Trace the result belongs to
    pub trace_id: String,
    /// Agent that produced the result
    pub responder: String,
    pub outcome: CallOutcome,
    /// Time from registration to completion
    pub response_time: Duration,
}

/// A call waiting for its callback
struct PendingCall {
    sender: oneshot::Sender<CompletedCall>,
    created_at: Instant,
    /// Agent the call was sent to; only it may complete the call
    target: String,
    ttl: Duration,
}

/// Statistics for the pending store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_expired: AtomicU64,
    /// Receiver dropped or explicitly cancelled
    pub total_cancelled: AtomicU64,
}

/// Outstanding calls keyed by `trace_id`.
pub struct PendingResults {
    pending: DashMap<String, PendingCall>,
    default_ttl: Duration,
    stats: PendingStats,
}

impl PendingResults {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_ttl,
            stats: PendingStats::default(),
        }
    }

    /// Register `trace_id` and get a receiver for its result.
    ///
    /// Registering a trace that is already pending replaces the older waiter,
    /// whose receiver then resolves with a closed-channel error.
    pub fn register(
        &self,
        trace_id: &str,
        target: &str,
        ttl: Option<Duration>,
    ) -> oneshot::Receiver<CompletedCall> {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            sender: tx,
            created_at: Instant::now(),
            target: target.to_string(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };

        if self.pending.insert(trace_id.to_string(), call).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            warn!(trace_id = trace_id, "Replaced pending call with the same trace");
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(trace_id = trace_id, target = target, "Registered pending call");
        rx
    }

    /// Deliver the outcome for `trace_id`.
    ///
    /// Returns false if nobody is waiting (unknown, expired or dropped) or if
    /// `responder` is not the agent the call was sent to. A refused outcome
    /// leaves the call pending.
    pub fn complete(&self, trace_id: &str, responder: &str, outcome: CallOutcome) -> bool {
        let Some((_, call)) = self.pending.remove_if(trace_id, |_, call| call.target == responder)
        else {
            match self.pending.get(trace_id) {
                Some(call) => warn!(
                    trace_id = trace_id,
                    target = %call.target,
                    responder = responder,
                    "Refused result from an agent the call was not sent to"
                ),
                None => debug!(trace_id = trace_id, "Callback for unknown or expired trace"),
            }
            return false;
        };

        let response_time = call.created_at.elapsed();
        let completed = CompletedCall {
            trace_id: trace_id.to_string(),
            responder: responder.to_string(),
            outcome,
            response_time,
        };

        if call.sender.send(completed).is_ok() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                trace_id = trace_id,
                target = %call.target,
                response_time_ms = response_time.as_millis() as u64,
                "Completed pending call"
            );
            true
        } else {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(trace_id = trace_id, "Pending call receiver dropped");
            false
        }
    }

    /// Remove calls older than their TTL. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|trace_id, call| {
            let elapsed = now.duration_since(call.created_at);
            if elapsed > call.ttl {
                warn!(
                    trace_id = %trace_id,
                    target = %call.target,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Removing expired pending call"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .total_expired
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn cancel(&self, trace_id: &str) -> bool {
        if self.pending.remove(trace_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, trace_id: &str) -> bool {
        self.pending.contains_key(trace_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Periodically drop expired calls until the task is aborted.
pub async fn cleanup_task(store: Arc<PendingResults>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired pending calls");
        }
    }
}
