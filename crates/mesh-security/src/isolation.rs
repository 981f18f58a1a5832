//! # Tenant Isolation Engine
//!
//! Decides whether `caller` may invoke `target/tool` on behalf of a tenant.
//!
//! ## Decision Order
//!
//! | Step | Check                                        | On failure          |
//! |------|----------------------------------------------|---------------------|
//! | 1    | caller is not blocked                        | isolation denial    |
//! | 2    | tenant is known                              | isolation denial    |
//! | 3    | caller is known                              | isolation denial    |
//! | 4    | target is known                              | isolation denial    |
//! | 5    | caller may act in the tenant                 | cross-tenant denial |
//! | 6    | target may act in the tenant                 | isolation denial    |
//! | 7    | tool is allowed on the target                | isolation denial    |
//! | 8    | isolation level permits caller -> target     | isolation denial    |
//!
//! Every decision, allowed or denied, is appended to the access log exactly
//! once.

use crate::audit::{AccessAttempt, AccessFilter, AccessLog, TenantStats};
use crate::clock::{Clock, SystemClock};
use crate::errors::IsolationError;
use mesh_types::{
    AgentConfig, Headers, IsolationLevel, PolicyConfig, ReplyTo, TenantConfig, SHARED_TENANT,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct PolicyTables {
    tenants: HashMap<String, TenantConfig>,
    agents: HashMap<String, AgentConfig>,
    orchestrators: BTreeSet<String>,
    universal_sinks: BTreeSet<String>,
    callback_sinks: BTreeSet<String>,
}

impl PolicyTables {
    fn from_config(policy: PolicyConfig) -> Self {
        Self {
            tenants: policy
                .tenants
                .into_iter()
                .map(|t| (t.tenant_id.clone(), t))
                .collect(),
            agents: policy
                .agents
                .into_iter()
                .map(|a| (a.agent_id.clone(), a))
                .collect(),
            orchestrators: policy.orchestrators,
            universal_sinks: policy.universal_sinks,
            callback_sinks: policy.callback_sinks,
        }
    }
}

/// Outcome of the rule evaluation before it is logged.
enum Verdict {
    Allow(&'static str),
    Deny(&'static str),
    DenyCrossTenant(&'static str),
}

/// An allowed access decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub attempt_id: String,
    pub reason: String,
}

/// Evaluates tenant and agent policy and records every decision.
pub struct TenantIsolationEngine {
    tables: RwLock<PolicyTables>,
    blocked: RwLock<HashSet<String>>,
    log: AccessLog,
    clock: Arc<dyn Clock>,
}

impl TenantIsolationEngine {
    #[must_use]
    pub fn new(policy: PolicyConfig, log_capacity: usize) -> Self {
        Self::with_clock(policy, log_capacity, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(policy: PolicyConfig, log_capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(PolicyTables::from_config(policy)),
            blocked: RwLock::new(HashSet::new()),
            log: AccessLog::new(log_capacity),
            clock,
        }
    }

    /// Replace the whole policy.
    pub fn load_policy(&self, policy: PolicyConfig) {
        let tables = PolicyTables::from_config(policy);
        info!(
            tenants = tables.tenants.len(),
            agents = tables.agents.len(),
            "Isolation policy loaded"
        );
        *self.tables.write() = tables;
    }

    pub fn upsert_tenant(&self, tenant: TenantConfig) {
        self.tables
            .write()
            .tenants
            .insert(tenant.tenant_id.clone(), tenant);
    }

    pub fn upsert_agent(&self, agent: AgentConfig) {
        self.tables
            .write()
            .agents
            .insert(agent.agent_id.clone(), agent);
    }

    pub fn remove_agent(&self, agent_id: &str) -> bool {
        self.tables.write().agents.remove(agent_id).is_some()
    }

    pub fn add_orchestrator(&self, agent_id: impl Into<String>) {
        self.tables.write().orchestrators.insert(agent_id.into());
    }

    pub fn add_universal_sink(&self, agent_id: impl Into<String>) {
        self.tables.write().universal_sinks.insert(agent_id.into());
    }

    pub fn add_callback_sink(&self, agent_id: impl Into<String>) {
        self.tables.write().callback_sinks.insert(agent_id.into());
    }

    /// Block every call from `agent_id` until unblocked.
    pub fn block_agent(&self, agent_id: &str, reason: &str) {
        self.blocked.write().insert(agent_id.to_string());
        warn!(agent = agent_id, reason = reason, "Agent blocked");
    }

    pub fn unblock_agent(&self, agent_id: &str) -> bool {
        let removed = self.blocked.write().remove(agent_id);
        if removed {
            info!(agent = agent_id, "Agent unblocked");
        }
        removed
    }

    #[must_use]
    pub fn is_blocked(&self, agent_id: &str) -> bool {
        self.blocked.read().contains(agent_id)
    }

    /// Decide whether `headers.caller` may call `target_agent/tool_name`.
    ///
    /// # Errors
    ///
    /// - `CrossTenantAccess` when the caller may not act in the tenant
    /// - `TenantIsolation` for every other denial
    pub fn validate_access(
        &self,
        headers: &Headers,
        target_agent: &str,
        tool_name: &str,
        operation: &str,
    ) -> Result<AccessGrant, IsolationError> {
        let verdict = self.evaluate(headers, target_agent, tool_name);
        let (allowed, cross_tenant, reason) = match verdict {
            Verdict::Allow(reason) => (true, false, reason),
            Verdict::Deny(reason) => (false, false, reason),
            Verdict::DenyCrossTenant(reason) => (false, true, reason),
        };

        let attempt_id = self.record(
            headers,
            target_agent,
            tool_name,
            operation,
            allowed,
            cross_tenant,
            reason,
        );

        if allowed {
            debug!(
                caller = %headers.caller,
                target = target_agent,
                tool = tool_name,
                tenant = %headers.tenant_id,
                reason = reason,
                "Access allowed"
            );
            return Ok(AccessGrant {
                attempt_id,
                reason: reason.to_string(),
            });
        }

        warn!(
            caller = %headers.caller,
            target = target_agent,
            tool = tool_name,
            tenant = %headers.tenant_id,
            reason = reason,
            "Access denied"
        );
        if cross_tenant {
            Err(IsolationError::CrossTenantAccess {
                caller: headers.caller.clone(),
                tenant_id: headers.tenant_id.clone(),
                reason: reason.to_string(),
                attempt_id,
            })
        } else {
            Err(IsolationError::TenantIsolation {
                caller: headers.caller.clone(),
                target: target_agent.to_string(),
                tool: tool_name.to_string(),
                tenant_id: headers.tenant_id.clone(),
                reason: reason.to_string(),
                attempt_id,
            })
        }
    }

    fn evaluate(&self, headers: &Headers, target_agent: &str, tool_name: &str) -> Verdict {
        let caller_id = headers.caller.as_str();
        let tenant_id = headers.tenant_id.as_str();

        if self.is_blocked(caller_id) {
            return Verdict::Deny("caller is blocked");
        }

        let tables = self.tables.read();
        let Some(tenant) = tables.tenants.get(tenant_id) else {
            return Verdict::Deny("unknown tenant");
        };
        let Some(caller) = tables.agents.get(caller_id) else {
            return Verdict::Deny("unknown caller agent");
        };
        let Some(target) = tables.agents.get(target_agent) else {
            return Verdict::Deny("unknown target agent");
        };

        if !caller.allows_tenant(tenant_id) && !caller.cross_tenant_permissions.contains(tenant_id)
        {
            return Verdict::DenyCrossTenant("caller not permitted in tenant");
        }
        if !target.allows_tenant(tenant_id) {
            return Verdict::Deny("target not permitted in tenant");
        }
        if !target.allows_tool(tool_name) {
            return Verdict::Deny("tool not allowed on target");
        }

        let level = target
            .isolation_level
            .map_or(tenant.isolation_level, |own| tenant.isolation_level.stricter(own));
        match level {
            IsolationLevel::Shared => Verdict::Allow("shared isolation"),
            IsolationLevel::Permissive => Verdict::Allow("permissive isolation"),
            IsolationLevel::Strict => {
                if caller_id == target_agent {
                    Verdict::Allow("self call")
                } else if tenant_id == SHARED_TENANT {
                    Verdict::Allow("shared tenant")
                } else if tables.orchestrators.contains(caller_id) {
                    Verdict::Allow("orchestrator")
                } else if tables.universal_sinks.contains(target_agent) {
                    Verdict::Allow("universal sink")
                } else {
                    Verdict::Deny("strict isolation forbids cross-agent call")
                }
            }
        }
    }

    /// Check that a result may be delivered for `original_trace_id`.
    ///
    /// Valid when the trace matches, `reply_to` names the original caller or a
    /// configured sink, and a `tenant_id` inside the payload (if any) matches
    /// the headers.
    pub fn validate_callback_access(
        &self,
        headers: &Headers,
        original_trace_id: &str,
        payload: &Value,
    ) -> bool {
        let sink = headers
            .reply_to
            .as_deref()
            .map(ReplyTo::parse)
            .and_then(Result::ok)
            .map(|reply| reply.agent_id);

        let reason = if headers.trace_id != original_trace_id {
            Err("trace mismatch")
        } else if let Some(sink) = &sink {
            let tables = self.tables.read();
            let permitted = *sink == headers.caller
                || tables.universal_sinks.contains(sink)
                || tables.callback_sinks.contains(sink);
            if !permitted {
                Err("reply_to is not an allowed callback sink")
            } else if payload
                .get("tenant_id")
                .and_then(Value::as_str)
                .is_some_and(|t| t != headers.tenant_id)
            {
                Err("payload tenant does not match headers")
            } else {
                Ok("callback permitted")
            }
        } else {
            Err("missing or invalid reply_to")
        };

        let allowed = reason.is_ok();
        let reason = match reason {
            Ok(r) | Err(r) => r,
        };
        let target = sink.unwrap_or_default();
        self.record(headers, &target, "", "callback", allowed, false, reason);

        if !allowed {
            warn!(trace_id = %headers.trace_id, caller = %headers.caller, reason = reason, "Callback denied");
        }
        allowed
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        headers: &Headers,
        target_agent: &str,
        tool_name: &str,
        operation: &str,
        allowed: bool,
        cross_tenant: bool,
        reason: &str,
    ) -> String {
        let attempt_id = Uuid::new_v4().to_string();
        self.log.append(AccessAttempt {
            attempt_id: attempt_id.clone(),
            timestamp: self.clock.now(),
            tenant_id: headers.tenant_id.clone(),
            caller: headers.caller.clone(),
            target_agent: target_agent.to_string(),
            tool_name: tool_name.to_string(),
            trace_id: headers.trace_id.clone(),
            operation: operation.to_string(),
            allowed,
            reason: reason.to_string(),
            cross_tenant,
        });
        attempt_id
    }

    /// Recorded decisions matching `filter`, newest first.
    #[must_use]
    pub fn get_access_attempts(&self, filter: &AccessFilter, limit: usize) -> Vec<AccessAttempt> {
        self.log.query(filter, limit)
    }

    #[must_use]
    pub fn get_tenant_stats(&self, tenant_id: &str) -> TenantStats {
        self.log.tenant_stats(tenant_id)
    }

    #[must_use]
    pub fn access_log(&self) -> &AccessLog {
        &self.log
    }
}
