//! # Call Headers
//!
//! Standard headers carried by every tool call and callback, plus the
//! `reply_to` address format used for fan-in delivery of results.
//!
//! ## Wire Format
//!
//! All header fields are strings. `timestamp` is RFC 3339 (UTC, microsecond
//! precision). `auth_sig` is absent until the headers are signed and is opaque
//! to everything except the signing service.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Standard headers for an agent-to-agent tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    /// Tenant the call is executed on behalf of.
    pub tenant_id: String,
    /// End-to-end trace identifier. Callbacks reuse the original value.
    pub trace_id: String,
    /// Conversation the call belongs to.
    pub conversation_id: String,
    /// Calling agent. Must match the owner of the signing key.
    pub caller: String,
    /// Where the eventual result should be delivered (`scheme://agent/tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Signature string, set by the signing service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_sig: Option<String>,
    /// Creation (or signing) time.
    pub timestamp: String,
}

impl Headers {
    /// Create unsigned headers with fresh trace and conversation identifiers.
    pub fn new(tenant_id: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trace_id: Uuid::now_v7().to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            caller: caller.into(),
            reply_to: None,
            auth_sig: None,
            timestamp: format_timestamp(Utc::now()),
        }
    }

    /// Set the `reply_to` address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Override the trace identifier.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Override the conversation identifier.
    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    /// Returns true once a signature has been attached.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.auth_sig.is_some()
    }

    /// Headers for a follow-up message (e.g. a callback) sent by `caller`.
    ///
    /// Tenant, trace and conversation are preserved; `reply_to` and the
    /// signature are cleared.
    #[must_use]
    pub fn follow_up(&self, caller: impl Into<String>) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            trace_id: self.trace_id.clone(),
            conversation_id: self.conversation_id.clone(),
            caller: caller.into(),
            reply_to: None,
            auth_sig: None,
            timestamp: format_timestamp(Utc::now()),
        }
    }

    /// Parsed `reply_to` address, if present.
    ///
    /// # Errors
    ///
    /// Returns an `AddressError` if the address is malformed.
    pub fn reply_address(&self) -> Option<Result<ReplyTo, AddressError>> {
        self.reply_to.as_deref().map(ReplyTo::parse)
    }
}

/// Format a timestamp the way it travels in headers and signatures.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a header/signature timestamp.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// REPLY-TO ADDRESSING
// =============================================================================

/// Errors parsing a `reply_to` address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// No `scheme://` prefix.
    #[error("reply_to address {0:?} has no scheme")]
    MissingScheme(String),

    /// No `/` separating agent and tool.
    #[error("reply_to address {0:?} has no tool segment")]
    MissingTool(String),

    /// Agent or tool segment is empty.
    #[error("reply_to address {0:?} has an empty agent or tool")]
    EmptySegment(String),
}

/// A parsed `scheme://agent_id/tool_name` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyTo {
    /// Address scheme (`a2a`, `mcp`, ...).
    pub scheme: String,
    /// Agent that receives the callback.
    pub agent_id: String,
    /// Tool on that agent that receives the callback.
    pub tool_name: String,
}

impl ReplyTo {
    /// Build an address from its parts.
    pub fn new(
        scheme: impl Into<String>,
        agent_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Parse an address. The scheme is stripped, then the remainder is split
    /// on the first `/`.
    ///
    /// # Errors
    ///
    /// See [`AddressError`].
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(raw.to_string()))?;
        let (agent_id, tool_name) = rest
            .split_once('/')
            .ok_or_else(|| AddressError::MissingTool(raw.to_string()))?;

        if scheme.is_empty() || agent_id.is_empty() || tool_name.is_empty() {
            return Err(AddressError::EmptySegment(raw.to_string()));
        }

        Ok(Self::new(scheme, agent_id, tool_name))
    }
}

impl FromStr for ReplyTo {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.agent_id, self.tool_name)
    }
}
