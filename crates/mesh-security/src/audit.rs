//! # Access Log
//!
//! Bounded, append-only record of isolation decisions. The oldest records are
//! evicted once capacity is reached; appends are O(1).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of records retained.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// One access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessAttempt {
    pub attempt_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub caller: String,
    pub target_agent: String,
    pub tool_name: String,
    pub trace_id: String,
    pub operation: String,
    pub allowed: bool,
    pub reason: String,
    /// Denied because the caller acted outside its tenants.
    pub cross_tenant: bool,
}

/// Query over the access log. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    pub tenant_id: Option<String>,
    pub caller: Option<String>,
    pub target_agent: Option<String>,
    pub allowed: Option<bool>,
    pub since: Option<DateTime<Utc>>,
}

impl AccessFilter {
    #[must_use]
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    #[must_use]
    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = Some(allowed);
        self
    }

    #[must_use]
    pub fn matches(&self, attempt: &AccessAttempt) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| *t == attempt.tenant_id)
            && self.caller.as_ref().map_or(true, |c| *c == attempt.caller)
            && self
                .target_agent
                .as_ref()
                .map_or(true, |t| *t == attempt.target_agent)
            && self.allowed.map_or(true, |a| a == attempt.allowed)
            && self.since.map_or(true, |s| attempt.timestamp >= s)
    }
}

/// Per-tenant summary of retained records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TenantStats {
    pub tenant_id: String,
    pub total_attempts: usize,
    pub allowed: usize,
    pub denied: usize,
    pub deny_rate: f64,
    pub cross_tenant_violations: usize,
    pub distinct_callers: usize,
    /// Most requested tools, by count descending.
    pub top_tools: Vec<(String, usize)>,
}

/// Bounded in-memory access log.
pub struct AccessLog {
    records: Mutex<VecDeque<AccessAttempt>>,
    capacity: usize,
    appended: AtomicU64,
    evicted: AtomicU64,
}

impl AccessLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            capacity,
            appended: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn append(&self, attempt: AccessAttempt) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(attempt);
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Matching records, newest first.
    #[must_use]
    pub fn query(&self, filter: &AccessFilter, limit: usize) -> Vec<AccessAttempt> {
        self.records
            .lock()
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn tenant_stats(&self, tenant_id: &str) -> TenantStats {
        let records = self.records.lock();
        let mut stats = TenantStats {
            tenant_id: tenant_id.to_string(),
            ..TenantStats::default()
        };
        let mut callers = HashSet::new();
        let mut tools: HashMap<&str, usize> = HashMap::new();

        for attempt in records.iter().filter(|a| a.tenant_id == tenant_id) {
            stats.total_attempts += 1;
            if attempt.allowed {
                stats.allowed += 1;
            } else {
                stats.denied += 1;
            }
            if attempt.cross_tenant {
                stats.cross_tenant_violations += 1;
            }
            callers.insert(attempt.caller.as_str());
            *tools.entry(attempt.tool_name.as_str()).or_default() += 1;
        }

        stats.distinct_callers = callers.len();
        if stats.total_attempts > 0 {
            stats.deny_rate = stats.denied as f64 / stats.total_attempts as f64;
        }
        let mut top: Vec<(String, usize)> = tools
            .into_iter()
            .map(|(tool, count)| (tool.to_string(), count))
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(5);
        stats.top_tools = top;
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records appended since creation, including evicted ones.
    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
