//! Tool handlers, schema-checked registration and cross-agent discovery.

use crate::translation::RawFailure;
use async_trait::async_trait;
use dashmap::DashMap;
use jsonschema::{Draft, Validator};
use mesh_types::{Headers, ToolDescriptor, UnifiedError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Executes one tool on behalf of an admitted caller.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, arguments: Value, headers: &Headers) -> Result<Value, UnifiedError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value, Headers) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, UnifiedError>> + Send,
{
    async fn handle(&self, arguments: Value, headers: &Headers) -> Result<Value, UnifiedError> {
        (self.0)(arguments, headers.clone()).await
    }
}

/// Wrap `f` as a shareable tool handler.
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, Headers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, UnifiedError>> + Send + 'static,
{
    Arc::new(FnTool(f))
}

/// Registration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool {tool} has an invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("tool {0} is already registered")]
    Duplicate(String),
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: Validator,
    handler: Arc<dyn ToolHandler>,
}

/// Tools exposed by one agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Its input schema is compiled once here.
    pub fn register(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&descriptor.input_schema)
            .map_err(|e| ToolError::InvalidSchema {
                tool: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        let mut tools = self.tools.write();
        if tools.contains_key(&descriptor.name) {
            return Err(ToolError::Duplicate(descriptor.name));
        }
        info!(tool = %descriptor.name, "Tool registered");
        tools.insert(
            descriptor.name.clone(),
            Arc::new(RegisteredTool {
                descriptor,
                validator,
                handler,
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Descriptors sorted by tool name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .values()
            .map(|t| t.descriptor.clone())
            .collect()
    }

    /// Look up `name` and check `arguments` against its input schema.
    pub(crate) fn resolve(
        &self,
        agent: &str,
        name: &str,
        arguments: &Value,
    ) -> Result<Arc<dyn ToolHandler>, RawFailure> {
        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RawFailure::ToolNotFound {
                agent: agent.to_string(),
                tool: name.to_string(),
            })?;

        let problems: Vec<String> = tool
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(RawFailure::Validation(format!(
                "arguments for {name}: {}",
                problems.join("; ")
            )));
        }
        Ok(tool.handler.clone())
    }
}

/// Tool descriptors published by every agent on a bus.
#[derive(Debug, Default)]
pub struct ToolDirectory {
    entries: DashMap<String, Vec<ToolDescriptor>>,
}

impl ToolDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tools listed for `agent`.
    pub fn publish(&self, agent: &str, tools: Vec<ToolDescriptor>) {
        self.entries.insert(agent.to_string(), tools);
    }

    pub fn withdraw(&self, agent: &str) -> bool {
        self.entries.remove(agent).is_some()
    }

    pub fn tools_for(&self, agent: &str) -> Option<Vec<ToolDescriptor>> {
        self.entries.get(agent).map(|tools| tools.clone())
    }

    pub fn agents(&self) -> Vec<String> {
        let mut agents: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }
}
