//! # Test Fixtures
//!
//! A small mesh shared by the integration flows and the benchmarks:
//!
//! | Agent | Tenants | Exposes |
//! |-------|---------|---------|
//! | `crypto` | `tenant-x` | `publish_signal` |
//! | `erp` | `tenant-x` | `check_compliance` |
//! | `ledger` | `tenant-y` | `check_compliance` |
//! | `collector` | `tenant-x` | (universal sink) |

use mesh_bus::InMemoryTransport;
use mesh_gateway::{tool_fn, ConfigError, Gateway, GatewayConfig, MeshServices, ToolHandler};
use mesh_security::{Clock, SigningService};
use mesh_telemetry::{InMemoryAuditSink, InMemoryMetricsSink};
use mesh_types::{
    AgentConfig, Headers, IsolationLevel, PolicyConfig, TenantConfig, ToolDescriptor,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const TENANT_X: &str = "tenant-x";
pub const TENANT_Y: &str = "tenant-y";

/// Trades at or above this amount are not compliant.
pub const COMPLIANCE_LIMIT: f64 = 10_000.0;

/// Policy for the agents in the table above.
pub fn mesh_policy(level: IsolationLevel) -> PolicyConfig {
    PolicyConfig {
        tenants: vec![
            TenantConfig::new(TENANT_X, level),
            TenantConfig::new(TENANT_Y, level),
        ],
        agents: vec![
            AgentConfig::new("crypto")
                .with_tenants([TENANT_X])
                .with_tools(["publish_signal"]),
            AgentConfig::new("erp")
                .with_tenants([TENANT_X])
                .with_tools(["check_compliance"]),
            AgentConfig::new("ledger")
                .with_tenants([TENANT_Y])
                .with_tools(["check_compliance"]),
            AgentConfig::new("collector").with_tenants([TENANT_X]),
        ],
        universal_sinks: ["collector".to_string()].into(),
        ..PolicyConfig::default()
    }
}

/// `check_compliance`: `{"amount": number}` -> `{"compliant": bool, "tenant_id": ..}`.
pub fn compliance_tool(owner: &str) -> (ToolDescriptor, Arc<dyn ToolHandler>) {
    let descriptor = ToolDescriptor::new("check_compliance", "Check a trade against limits", owner)
        .with_input_schema(json!({
            "type": "object",
            "properties": { "amount": { "type": "number", "minimum": 0 } },
            "required": ["amount"]
        }));
    let handler = tool_fn(|args: Value, headers: Headers| async move {
        let amount = args["amount"].as_f64().unwrap_or_default();
        Ok(json!({ "compliant": amount < COMPLIANCE_LIMIT, "tenant_id": headers.tenant_id }))
    });
    (descriptor, handler)
}

/// Shared services plus in-memory sinks to assert against.
pub struct TestMesh {
    pub config: GatewayConfig,
    pub transport: Arc<InMemoryTransport>,
    pub services: MeshServices,
    pub audit: Arc<InMemoryAuditSink>,
    pub metrics: Arc<InMemoryMetricsSink>,
}

impl TestMesh {
    pub fn new(level: IsolationLevel) -> Result<Self, ConfigError> {
        Self::with_config(GatewayConfig {
            policy: mesh_policy(level),
            ..GatewayConfig::default()
        })
    }

    pub fn with_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = Arc::new(InMemoryTransport::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let services = MeshServices::from_config(&config, transport.clone())?
            .with_audit(audit.clone())
            .with_metrics(metrics.clone());
        Ok(Self {
            config,
            transport,
            services,
            audit,
            metrics,
        })
    }

    /// Replace the signing service with one driven by `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let policy = self.config.security.signing_policy()?;
        self.services = self
            .services
            .with_signing(Arc::new(SigningService::with_clock(policy, clock)));
        Ok(self)
    }

    /// A gateway for `agent_id` holding a fresh key in `tenant_id`.
    pub fn gateway(&self, agent_id: &str, tenant_id: &str) -> Arc<Gateway> {
        let gateway = Arc::new(Gateway::new(
            agent_id,
            self.config.clone(),
            self.services.clone(),
        ));
        gateway.provision_key(tenant_id);
        gateway
    }

    /// A gateway exposing `check_compliance`.
    pub fn compliance_gateway(&self, agent_id: &str, tenant_id: &str) -> Arc<Gateway> {
        let gateway = self.gateway(agent_id, tenant_id);
        let (descriptor, handler) = compliance_tool(agent_id);
        // Fresh registry: registration cannot collide.
        let _ = gateway.register_tool(descriptor, handler);
        gateway
    }
}
