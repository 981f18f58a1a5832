//! Tenant and agent policy records.
//!
//! These are the structured tables the isolation engine evaluates. They are
//! normally loaded from the `[policy]` section of the gateway config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Wildcard entry in `allowed_tenants`.
pub const WILDCARD: &str = "*";

/// Tenant whose calls bypass strict isolation.
pub const SHARED_TENANT: &str = "shared";

/// How strictly a tenant separates its agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Agents only reach themselves, orchestrators or universal sinks.
    #[default]
    Strict,
    /// Any permitted agent may call any permitted agent in the tenant.
    Permissive,
    /// Resources are shared across agents.
    Shared,
}

impl IsolationLevel {
    /// Higher is stricter.
    #[must_use]
    pub fn strictness(self) -> u8 {
        match self {
            IsolationLevel::Strict => 2,
            IsolationLevel::Permissive => 1,
            IsolationLevel::Shared => 0,
        }
    }

    /// The stricter of `self` and `other`.
    #[must_use]
    pub fn stricter(self, other: IsolationLevel) -> IsolationLevel {
        if other.strictness() > self.strictness() {
            other
        } else {
            self
        }
    }
}

/// Policy for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub allowed_agents: BTreeSet<String>,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    #[serde(default)]
    pub shared_resources: BTreeSet<String>,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>, isolation_level: IsolationLevel) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            allowed_agents: BTreeSet::new(),
            isolation_level,
            shared_resources: BTreeSet::new(),
        }
    }
}

/// Policy for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    #[serde(default)]
    pub allowed_tenants: BTreeSet<String>,
    #[serde(default)]
    pub allowed_tools: BTreeSet<String>,
    /// Tightens the tenant's level for calls targeting this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_level: Option<IsolationLevel>,
    /// Tenants outside `allowed_tenants` this agent may still act in.
    #[serde(default)]
    pub cross_tenant_permissions: BTreeSet<String>,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            allowed_tenants: BTreeSet::new(),
            allowed_tools: BTreeSet::new(),
            isolation_level: None,
            cross_tenant_permissions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tenants.extend(tenants.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_cross_tenant<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cross_tenant_permissions
            .extend(tenants.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// `allowed_tenants` contains `tenant_id` or the wildcard.
    #[must_use]
    pub fn allows_tenant(&self, tenant_id: &str) -> bool {
        self.allowed_tenants.contains(tenant_id) || self.allowed_tenants.contains(WILDCARD)
    }

    #[must_use]
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.allowed_tools.contains(tool_name)
    }
}

/// The full policy table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub tenants: Vec<TenantConfig>,
    pub agents: Vec<AgentConfig>,
    /// Agents exempt from strict isolation (they coordinate other agents).
    pub orchestrators: BTreeSet<String>,
    /// Agents that may receive calls from anyone (fan-in collectors).
    pub universal_sinks: BTreeSet<String>,
    /// Agents allowed as `reply_to` targets in addition to universal sinks.
    pub callback_sinks: BTreeSet<String>,
}
