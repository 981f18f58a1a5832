//! Tool descriptors, acknowledgements and call outcomes.

use crate::errors::UnifiedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool exposed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique per agent.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema the arguments must satisfy.
    pub input_schema: Value,
    /// JSON Schema of the result.
    pub output_schema: Value,
    /// Kind of agent that owns the tool (`erp`, `trading`, `meeting`, ...).
    pub owning_agent_type: String,
}

impl ToolDescriptor {
    /// Descriptor accepting any JSON object and returning any JSON value.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        owning_agent_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object" }),
            output_schema: serde_json::json!({}),
            owning_agent_type: owning_agent_type.into(),
        }
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

/// Immediate acknowledgement returned for an accepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAck {
    pub trace_id: String,
    pub conversation_id: String,
    pub target: String,
    pub tool: String,
    pub accepted_at: DateTime<Utc>,
}

/// Final result of a tool call, delivered through the callback channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum CallOutcome {
    Success(Value),
    Failure(UnifiedError),
}

impl CallOutcome {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried `UnifiedError` for `Failure`.
    pub fn into_result(self) -> Result<Value, UnifiedError> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Failure(err) => Err(err),
        }
    }
}

impl From<Result<Value, UnifiedError>> for CallOutcome {
    fn from(result: Result<Value, UnifiedError>) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(err) => CallOutcome::Failure(err),
        }
    }
}
