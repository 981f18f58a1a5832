//! # Gateway
//!
//! Composition root for one agent: signs and sends outbound calls through a
//! per-target circuit breaker, and admits inbound calls through signature
//! verification and tenant isolation before dispatching them.
//!
//! ## Call Protocol
//!
//! ```text
//!  caller gateway                      bus                    target gateway
//!  ──────────────                      ───                    ──────────────
//!  call_tool ── sign ── breaker ──► Call ──► handle_inbound
//!     ◄── CallAck                                  ├─ validate_inbound (signature, replay)
//!                                                  ├─ validate_access (policy)
//!                                                  ├─ schema check
//!                                                  └─ spawn handler ──► send_callback
//!  reply_to sink ◄──────────────────── Callback ◄──────────────────────────┘
//! ```
//!
//! The caller sees failures only on the ack path. Result delivery is
//! fire-and-forget: a callback that cannot be delivered is logged.

use crate::domain::config::{ConfigError, GatewayConfig};
use crate::domain::pending::{cleanup_task, PendingResults};
use crate::middleware::circuit_breaker::{BreakerStatus, CircuitBreakerRegistry};
use crate::tools::{ToolDirectory, ToolError, ToolHandler, ToolRegistry};
use crate::translation::{ErrorContext, ErrorTranslationLayer, RawFailure};
use chrono::Utc;
use mesh_bus::{Mailbox, Transport};
use mesh_security::{AuthenticationService, SigningService, TenantIsolationEngine};
use mesh_telemetry::{
    agent_span, names, AuditSink, MetricUnit, MetricsSink, SpanContext, SpanSink, SpanStatus,
    TracingAuditSink, TracingMetricsSink, TracingSpanSink,
};
use mesh_types::{
    BusMessage, CallAck, CallOutcome, Headers, ReplyTo, ToolCall, ToolCallback, ToolDescriptor,
    UnifiedError, UnifiedErrorCode,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Scheme of `reply_to` addresses generated by the gateway.
pub const CALLBACK_SCHEME: &str = "mesh";

/// Services shared by every gateway on one bus.
#[derive(Clone)]
pub struct MeshServices {
    pub transport: Arc<dyn Transport>,
    pub signing: Arc<SigningService>,
    pub isolation: Arc<TenantIsolationEngine>,
    pub directory: Arc<ToolDirectory>,
    pub metrics: Arc<dyn MetricsSink>,
    pub spans: Arc<dyn SpanSink>,
    pub audit: Arc<dyn AuditSink>,
}

impl MeshServices {
    /// Build signing and isolation from `config`, with tracing-backed sinks.
    pub fn from_config(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let signing = SigningService::new(config.security.signing_policy()?);
        let isolation =
            TenantIsolationEngine::new(config.policy.clone(), config.audit.access_log_capacity);

        Ok(Self {
            transport,
            signing: Arc::new(signing),
            isolation: Arc::new(isolation),
            directory: Arc::new(ToolDirectory::new()),
            metrics: Arc::new(TracingMetricsSink),
            spans: Arc::new(TracingSpanSink::default()),
            audit: Arc::new(TracingAuditSink),
        })
    }

    #[must_use]
    pub fn with_signing(mut self, signing: Arc<SigningService>) -> Self {
        self.signing = signing;
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: Arc<TenantIsolationEngine>) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_spans(mut self, spans: Arc<dyn SpanSink>) -> Self {
        self.spans = spans;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

/// Immediate answer to an inbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundResponse {
    /// Admitted; the result follows as a callback.
    Accepted(CallAck),
    /// Denied before dispatch.
    Rejected(UnifiedError),
}

impl InboundResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, InboundResponse::Accepted(_))
    }
}

/// Gateway for a single agent.
pub struct Gateway {
    agent_id: String,
    config: GatewayConfig,
    services: MeshServices,
    auth: AuthenticationService,
    breakers: CircuitBreakerRegistry,
    translator: ErrorTranslationLayer,
    tools: ToolRegistry,
    pending: Arc<PendingResults>,
    /// Receives callbacks nobody is waiting for (fan-in collectors).
    callbacks: Mutex<Option<mpsc::Sender<ToolCallback>>>,
}

impl Gateway {
    pub fn new(agent_id: impl Into<String>, config: GatewayConfig, services: MeshServices) -> Self {
        let agent_id = agent_id.into();
        let auth = AuthenticationService::new(
            agent_id.clone(),
            services.signing.clone(),
            config.security.default_algorithm,
        );
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone())
            .with_metrics(services.metrics.clone());
        let translator = ErrorTranslationLayer::new(services.audit.clone(), services.metrics.clone());
        let pending = Arc::new(PendingResults::new(config.timeouts.callback_wait));

        Self {
            agent_id,
            config,
            services,
            auth,
            breakers,
            translator,
            tools: ToolRegistry::new(),
            pending,
            callbacks: Mutex::new(None),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthenticationService {
        &self.auth
    }

    pub fn isolation(&self) -> &Arc<TenantIsolationEngine> {
        &self.services.isolation
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn translator(&self) -> &ErrorTranslationLayer {
        &self.translator
    }

    pub fn pending(&self) -> &Arc<PendingResults> {
        &self.pending
    }

    /// Health snapshot of every breaker this gateway has used.
    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        self.breakers.statuses()
    }

    /// Issue a signing key for this agent in the configured algorithm.
    pub fn provision_key(&self, tenant_id: &str) -> String {
        let signing = &self.services.signing;
        signing.create_key(
            &self.agent_id,
            tenant_id,
            self.config.security.default_algorithm,
            signing.policy().key_ttl,
        )
    }

    /// Expose a tool and publish the updated list to the directory.
    pub fn register_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        self.tools.register(descriptor, handler)?;
        self.services
            .directory
            .publish(&self.agent_id, self.tools.descriptors());
        Ok(())
    }

    /// Tools exposed by `target`.
    pub fn discover_tools(&self, target: &str) -> Result<Vec<ToolDescriptor>, UnifiedError> {
        if target == self.agent_id {
            return Ok(self.tools.descriptors());
        }
        self.services.directory.tools_for(target).ok_or_else(|| {
            self.translator.translate(
                RawFailure::Unavailable {
                    service: target.to_string(),
                    reason: "no tools published".to_string(),
                },
                &ErrorContext::new("gateway", "discover_tools").with_service(target),
            )
        })
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Send a tool call and return once the target's mailbox accepted it.
    ///
    /// Unsigned headers are signed as this agent. The send runs through the
    /// target's circuit breaker with `timeout` (or the configured default).
    pub async fn call_tool(
        &self,
        target: &str,
        tool: &str,
        arguments: Value,
        headers: Headers,
        timeout: Option<Duration>,
    ) -> Result<CallAck, UnifiedError> {
        let span = self.services.spans.start_span(
            "gateway.call_tool",
            SpanContext::new(&headers.trace_id, &headers.tenant_id)
                .with_attribute("target", target)
                .with_attribute("tool", tool),
        );
        let started = Instant::now();

        let result = self
            .send_call(target, tool, arguments, headers, timeout)
            .instrument(agent_span!("call_tool", agent = %self.agent_id, callee = target, tool = tool))
            .await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.services.metrics.emit_metric(
            names::CALL,
            1.0,
            MetricUnit::Count,
            &[("target", target), ("outcome", outcome)],
            Some(span.context.tenant_id.as_str()),
        );
        self.services.metrics.emit_metric(
            names::CALL_DURATION,
            started.elapsed().as_secs_f64(),
            MetricUnit::Seconds,
            &[("target", target)],
            Some(span.context.tenant_id.as_str()),
        );
        let status = if result.is_ok() { SpanStatus::Ok } else { SpanStatus::Error };
        self.services.spans.end_span(span, status);
        result
    }

    async fn send_call(
        &self,
        target: &str,
        tool: &str,
        arguments: Value,
        headers: Headers,
        timeout: Option<Duration>,
    ) -> Result<CallAck, UnifiedError> {
        let ctx = ErrorContext::new("gateway", "call_tool")
            .for_call(&headers)
            .with_service(target);

        let signed = self
            .auth
            .ensure_signed(&headers)
            .map_err(|e| self.translator.translate(e.into(), &ctx))?;

        let ack = CallAck {
            trace_id: signed.trace_id.clone(),
            conversation_id: signed.conversation_id.clone(),
            target: target.to_string(),
            tool: tool.to_string(),
            accepted_at: Utc::now(),
        };
        let message = BusMessage::Call(ToolCall {
            headers: signed,
            target_agent: target.to_string(),
            tool_name: tool.to_string(),
            arguments,
        });

        let deadline = timeout.unwrap_or(self.config.timeouts.default_call);
        let breaker = self.breakers.get_or_create(target);
        breaker
            .execute_with_timeout(deadline, self.services.transport.send(target, message))
            .await
            .map_err(|e| self.translator.translate(e.into(), &ctx))?;

        debug!(target = target, tool = tool, trace_id = %ack.trace_id, "Call acknowledged");
        Ok(ack)
    }

    /// Call a tool and wait for its callback.
    ///
    /// Without a `reply_to`, the result is addressed back to this agent.
    /// `wait` bounds the wait for the callback (default: `timeouts.callback_wait`).
    pub async fn call_tool_and_wait(
        &self,
        target: &str,
        tool: &str,
        arguments: Value,
        mut headers: Headers,
        wait: Option<Duration>,
    ) -> Result<Value, UnifiedError> {
        if headers.reply_to.is_none() {
            headers.reply_to = Some(ReplyTo::new(CALLBACK_SCHEME, &self.agent_id, tool).to_string());
            // A signature over the old headers no longer matches.
            headers.auth_sig = None;
        }

        let wait = wait.unwrap_or(self.config.timeouts.callback_wait);
        let trace_id = headers.trace_id.clone();
        let ctx = ErrorContext::new("gateway", "call_tool_and_wait")
            .for_call(&headers)
            .with_service(target);

        let receiver = self.pending.register(&trace_id, target, Some(wait));
        if let Err(e) = self.call_tool(target, tool, arguments, headers, None).await {
            self.pending.cancel(&trace_id);
            return Err(e);
        }

        match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(completed)) => completed.outcome.into_result(),
            Ok(Err(_)) | Err(_) => {
                self.pending.cancel(&trace_id);
                Err(self.translator.translate(
                    RawFailure::Timeout {
                        operation: format!("callback from {target}/{tool}"),
                        after: wait,
                    },
                    &ctx,
                ))
            }
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Authenticate and authorize an inbound call, then dispatch it.
    ///
    /// The isolation decision is always made before the handler runs. The
    /// handler runs on its own task; its result goes to `reply_to`.
    pub fn handle_inbound(self: &Arc<Self>, call: ToolCall) -> InboundResponse {
        let headers = call.headers.clone();
        let tool = call.tool_name.clone();
        let ctx = ErrorContext::new("gateway", "handle_inbound")
            .for_call(&headers)
            .with_service(&self.agent_id);

        let response = match self.admit(&call, &ctx) {
            Ok(handler) => {
                let ack = CallAck {
                    trace_id: headers.trace_id.clone(),
                    conversation_id: headers.conversation_id.clone(),
                    target: self.agent_id.clone(),
                    tool: tool.clone(),
                    accepted_at: Utc::now(),
                };
                self.dispatch(handler, call, ctx);
                InboundResponse::Accepted(ack)
            }
            Err(err) => InboundResponse::Rejected(err),
        };

        let outcome = if response.is_accepted() { "accepted" } else { "rejected" };
        self.services.metrics.emit_metric(
            names::INBOUND,
            1.0,
            MetricUnit::Count,
            &[("tool", tool.as_str()), ("outcome", outcome)],
            Some(headers.tenant_id.as_str()),
        );
        response
    }

    fn admit(&self, call: &ToolCall, ctx: &ErrorContext) -> Result<Arc<dyn ToolHandler>, UnifiedError> {
        let headers = &call.headers;

        self.auth
            .validate_inbound(headers)
            .map_err(|e| self.translator.translate(e.into(), ctx))?;

        let grant = self
            .services
            .isolation
            .validate_access(headers, &self.agent_id, &call.tool_name, "call_tool")
            .map_err(|e| self.translator.translate(e.into(), ctx))?;
        debug!(attempt_id = %grant.attempt_id, reason = %grant.reason, "Inbound call admitted");

        self.tools
            .resolve(&self.agent_id, &call.tool_name, &call.arguments)
            .map_err(|e| self.translator.translate(e, ctx))
    }

    fn dispatch(self: &Arc<Self>, handler: Arc<dyn ToolHandler>, call: ToolCall, ctx: ErrorContext) {
        let gateway = Arc::clone(self);
        let deadline = self.config.timeouts.tool_execution;
        let span = agent_span!(
            "dispatch",
            agent = %self.agent_id,
            tool = %call.tool_name,
            trace_id = %call.headers.trace_id
        );

        tokio::spawn(
            async move {
                let ToolCall {
                    headers,
                    tool_name,
                    arguments,
                    ..
                } = call;

                let outcome = match tokio::time::timeout(deadline, handler.handle(arguments, &headers)).await {
                    Ok(Ok(value)) => CallOutcome::Success(value),
                    Ok(Err(err)) => CallOutcome::Failure(gateway.translator.track(err, &ctx)),
                    Err(_) => CallOutcome::Failure(gateway.translator.translate(
                        RawFailure::ToolTimeout {
                            tool: tool_name,
                            after: deadline,
                        },
                        &ctx,
                    )),
                };

                match headers.reply_to.clone() {
                    Some(reply_to) => {
                        gateway.send_callback(&reply_to, outcome, &headers).await;
                    }
                    None => debug!("No reply_to; result dropped"),
                }
            }
            .instrument(span),
        );
    }

    /// Deliver `outcome` for the call described by `headers` to `reply_to`.
    ///
    /// Returns false if the address is malformed, the callback is not
    /// permitted, or delivery fails. Failures are logged, never raised.
    pub async fn send_callback(&self, reply_to: &str, outcome: CallOutcome, headers: &Headers) -> bool {
        let address = match ReplyTo::parse(reply_to) {
            Ok(address) => address,
            Err(e) => {
                warn!(trace_id = %headers.trace_id, error = %e, "Cannot deliver callback");
                return false;
            }
        };

        let payload = match &outcome {
            CallOutcome::Success(value) => value.clone(),
            CallOutcome::Failure(err) => serde_json::to_value(err).unwrap_or(Value::Null),
        };
        let mut scope = headers.clone();
        scope.reply_to = Some(reply_to.to_string());
        if !self
            .services
            .isolation
            .validate_callback_access(&scope, &headers.trace_id, &payload)
        {
            return false;
        }

        let callback_headers = match self.auth.sign_outbound(&headers.follow_up(&self.agent_id)) {
            Ok(signed) => signed,
            Err(e) => {
                warn!(trace_id = %headers.trace_id, error = %e, "Cannot sign callback");
                return false;
            }
        };

        let message = BusMessage::Callback(ToolCallback {
            headers: callback_headers,
            target_agent: address.agent_id.clone(),
            tool_name: address.tool_name.clone(),
            original_trace_id: headers.trace_id.clone(),
            outcome,
        });

        match self.services.transport.send(&address.agent_id, message).await {
            Ok(()) => {
                debug!(sink = %address.agent_id, trace_id = %headers.trace_id, "Callback delivered");
                true
            }
            Err(e) => {
                warn!(sink = %address.agent_id, trace_id = %headers.trace_id, error = %e, "Callback delivery failed");
                false
            }
        }
    }

    /// Accept a callback addressed to this agent.
    ///
    /// Completes a waiting `call_tool_and_wait`, otherwise forwards the
    /// callback to the subscriber (if any). Returns false if it was rejected
    /// or nobody took it.
    pub fn handle_callback(&self, callback: ToolCallback) -> bool {
        let ctx = ErrorContext::new("gateway", "handle_callback").for_call(&callback.headers);

        if let Err(e) = self.auth.validate_inbound(&callback.headers) {
            self.translator.translate(e.into(), &ctx);
            return false;
        }
        if callback.headers.trace_id != callback.original_trace_id {
            warn!(
                trace_id = %callback.headers.trace_id,
                original = %callback.original_trace_id,
                "Callback trace does not match its original call"
            );
            return false;
        }

        if self.pending.is_pending(&callback.original_trace_id) {
            return self.pending.complete(
                &callback.original_trace_id,
                &callback.headers.caller,
                callback.outcome,
            );
        }

        let subscriber = self.callbacks.lock().clone();
        match subscriber {
            Some(tx) => match tx.try_send(callback) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Callback subscriber unavailable");
                    false
                }
            },
            None => {
                debug!(trace_id = %callback.original_trace_id, "Unclaimed callback dropped");
                false
            }
        }
    }

    /// Receive callbacks that no pending call claims.
    ///
    /// Replaces any earlier subscriber.
    pub fn subscribe_callbacks(&self, capacity: usize) -> mpsc::Receiver<ToolCallback> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.callbacks.lock() = Some(tx);
        rx
    }

    /// Drain `mailbox` until it closes.
    ///
    /// Denied calls whose signature verified are answered with an error
    /// callback when they carry a `reply_to`.
    pub async fn serve(self: Arc<Self>, mut mailbox: Mailbox) {
        info!(agent = %self.agent_id, endpoint = mailbox.endpoint(), "Gateway serving");
        while let Some(message) = mailbox.recv().await {
            match message {
                BusMessage::Call(call) => {
                    let headers = call.headers.clone();
                    if let InboundResponse::Rejected(err) = self.handle_inbound(call) {
                        let authenticated = err.code != UnifiedErrorCode::AuthenticationFailed;
                        if let (true, Some(reply_to)) = (authenticated, headers.reply_to.as_deref()) {
                            self.send_callback(reply_to, CallOutcome::Failure(err), &headers)
                                .await;
                        }
                    }
                }
                BusMessage::Callback(callback) => {
                    self.handle_callback(callback);
                }
            }
        }
        info!(agent = %self.agent_id, "Gateway mailbox closed");
    }

    /// Register this agent's mailbox and serve it on a new task.
    pub fn spawn_serve(self: &Arc<Self>) -> Result<JoinHandle<()>, UnifiedError> {
        let mailbox = self.services.transport.register(&self.agent_id).map_err(|e| {
            self.translator.translate(
                e.into(),
                &ErrorContext::new("gateway", "spawn_serve").with_service(&self.agent_id),
            )
        })?;
        Ok(tokio::spawn(Arc::clone(self).serve(mailbox)))
    }

    /// Periodically drop pending calls whose callback never came.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        tokio::spawn(cleanup_task(
            self.pending.clone(),
            self.config.timeouts.pending_cleanup_interval,
        ))
    }
}
