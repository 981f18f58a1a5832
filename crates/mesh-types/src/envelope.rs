//! # Bus Messages
//!
//! The two message kinds that travel over the transport.
//!
//! ## Flow
//!
//! - **`Call`**: caller → target. The target replies synchronously with an
//!   ack or a denial and later sends a `Callback` to `headers.reply_to`.
//! - **`Callback`**: target → `reply_to` agent. Carries the same `trace_id` as
//!   the original call so results can be correlated (fan-in).

use crate::headers::Headers;
use crate::tool::CallOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to invoke `tool_name` on `target_agent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub headers: Headers,
    pub target_agent: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The eventual result of a call, addressed by the original `reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallback {
    pub headers: Headers,
    pub target_agent: String,
    pub tool_name: String,
    /// Trace of the call this callback answers.
    pub original_trace_id: String,
    pub outcome: CallOutcome,
}

/// Anything delivered through a `Transport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    Call(ToolCall),
    Callback(ToolCallback),
}

impl BusMessage {
    /// Headers of the message.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        match self {
            BusMessage::Call(call) => &call.headers,
            BusMessage::Callback(callback) => &callback.headers,
        }
    }

    /// Agent the message is addressed to.
    #[must_use]
    pub fn target_agent(&self) -> &str {
        match self {
            BusMessage::Call(call) => &call.target_agent,
            BusMessage::Callback(callback) => &callback.target_agent,
        }
    }

    /// Tool the message is addressed to.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            BusMessage::Call(call) => &call.tool_name,
            BusMessage::Callback(callback) => &callback.tool_name,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Call(_) => "call",
            BusMessage::Callback(_) => "callback",
        }
    }
}
