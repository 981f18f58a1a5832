//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to logs
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full directive
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Prefix for Prometheus metric names
    pub metrics_namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "agent-mesh".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_namespace: "mesh".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MESH_SERVICE_NAME`: Service name (default: agent-mesh)
    /// - `MESH_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MESH_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MESH_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `MESH_METRICS_NAMESPACE`: Metric name prefix (default: mesh)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("MESH_SERVICE_NAME")
                .unwrap_or_else(|_| "agent-mesh".to_string()),

            log_level: env::var("MESH_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("MESH_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("MESH_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            metrics_namespace: env::var("MESH_METRICS_NAMESPACE")
                .unwrap_or_else(|_| "mesh".to_string()),
        }
    }

    /// Configuration for a single agent process.
    pub fn for_agent(agent_id: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("mesh-{agent_id}");
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
