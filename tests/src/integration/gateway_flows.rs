//! # Gateway Flows
//!
//! Call / ack / callback choreography between gateways on one bus:
//!
//! ```text
//! [crypto] ──Call(reply_to)──► [erp] ──ack──► [crypto]
//!                                │
//!                        handler runs
//!                                │
//!          Callback ◄────────────┘  (to crypto, or to a collector sink)
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy path**: call and wait for the callback
//! 2. **Fan-in**: many results delivered to one collector
//! 3. **Denials**: rejected calls still produce an error callback
//! 4. **Configuration**: a mesh built from a TOML document

use crate::fixtures::{TestMesh, COMPLIANCE_LIMIT, TENANT_X};
use futures::future::join_all;
use mesh_bus::Transport;
use mesh_gateway::{Gateway, GatewayConfig};
use mesh_telemetry::names;
use mesh_types::{
    BusMessage, CallOutcome, Headers, IsolationLevel, ReplyTo, ToolCallback, UnifiedErrorCode,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

// =============================================================================
// HAPPY PATH
// =============================================================================

#[tokio::test]
async fn test_call_and_wait_for_result() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    crypto.spawn_serve().unwrap();
    erp.spawn_serve().unwrap();

    let small = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": 250 }),
            Headers::new(TENANT_X, "crypto"),
            WAIT,
        )
        .await
        .unwrap();
    assert_eq!(small, json!({ "compliant": true, "tenant_id": TENANT_X }));

    let large = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": COMPLIANCE_LIMIT * 2.0 }),
            Headers::new(TENANT_X, "crypto"),
            WAIT,
        )
        .await
        .unwrap();
    assert_eq!(large["compliant"], false);

    let pending = crypto.pending().stats();
    assert_eq!(pending.total_completed.load(Ordering::Relaxed), 2);
    assert_eq!(crypto.pending().pending_count(), 0);

    let inbound = mesh.metrics.named(names::INBOUND);
    assert_eq!(inbound.len(), 2);
    assert!(inbound
        .iter()
        .all(|sample| sample.dimension("outcome") == Some("accepted")));
}

#[tokio::test]
async fn test_discover_then_call() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    crypto.spawn_serve().unwrap();
    erp.spawn_serve().unwrap();

    let tools = crypto.discover_tools("erp").unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].owning_agent_type, "erp");
    assert_eq!(tools[0].input_schema["required"], json!(["amount"]));

    let result = crypto
        .call_tool_and_wait(
            "erp",
            &tools[0].name,
            json!({ "amount": 1 }),
            Headers::new(TENANT_X, "crypto"),
            WAIT,
        )
        .await
        .unwrap();
    assert_eq!(result["compliant"], true);
}

#[tokio::test]
async fn test_result_only_accepted_from_called_agent() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.gateway("erp", TENANT_X);
    let collector = mesh.gateway("collector", TENANT_X);
    let mut erp_mailbox = mesh.transport.register("erp").unwrap();

    let waiting = {
        let crypto = Arc::clone(&crypto);
        tokio::spawn(async move {
            crypto
                .call_tool_and_wait(
                    "erp",
                    "check_compliance",
                    json!({ "amount": 10 }),
                    Headers::new(TENANT_X, "crypto"),
                    WAIT,
                )
                .await
        })
    };

    let Some(BusMessage::Call(call)) = timeout(Duration::from_secs(5), erp_mailbox.recv())
        .await
        .unwrap()
    else {
        panic!("erp did not receive the call");
    };
    let trace_id = call.headers.trace_id.clone();
    let callback_from = |gateway: &Arc<Gateway>, outcome: CallOutcome| ToolCallback {
        headers: gateway
            .auth()
            .sign_outbound(&call.headers.follow_up(gateway.agent_id()))
            .unwrap(),
        target_agent: "crypto".into(),
        tool_name: "check_compliance".into(),
        original_trace_id: trace_id.clone(),
        outcome,
    };

    // A validly signed result from an agent that was never called.
    let injected = callback_from(
        &collector,
        CallOutcome::Success(json!({ "compliant": true, "tenant_id": TENANT_X })),
    );
    assert!(!crypto.handle_callback(injected));
    assert!(crypto.pending().is_pending(&trace_id));

    let genuine = callback_from(
        &erp,
        CallOutcome::Success(json!({ "compliant": false, "tenant_id": TENANT_X })),
    );
    assert!(crypto.handle_callback(genuine));

    let result = waiting.await.unwrap().unwrap();
    assert_eq!(result["compliant"], false);
    assert_eq!(crypto.pending().stats().total_completed.load(Ordering::Relaxed), 1);
}

// =============================================================================
// FAN-IN
// =============================================================================

#[tokio::test]
async fn test_results_fan_in_to_collector() {
    const CALLS: usize = 8;
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    let collector = mesh.gateway("collector", TENANT_X);
    let mut results = collector.subscribe_callbacks(CALLS);
    erp.spawn_serve().unwrap();
    collector.spawn_serve().unwrap();

    let reply_to = ReplyTo::new("mesh", "collector", "compliance_results").to_string();
    let conversation = Headers::new(TENANT_X, "crypto").conversation_id;

    let acks = join_all((0..CALLS).map(|i| {
        let headers = Headers::new(TENANT_X, "crypto")
            .with_reply_to(reply_to.clone())
            .with_conversation_id(conversation.clone());
        crypto.call_tool(
            "erp",
            "check_compliance",
            json!({ "amount": i * 5_000 }),
            headers,
            None,
        )
    }))
    .await;
    let sent: HashSet<String> = acks.into_iter().map(|ack| ack.unwrap().trace_id).collect();
    assert_eq!(sent.len(), CALLS);

    let mut received = HashSet::new();
    let mut compliant = 0;
    for _ in 0..CALLS {
        let callback: ToolCallback = timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("timeout waiting for callback")
            .expect("subscriber closed");
        assert_eq!(callback.headers.caller, "erp");
        assert_eq!(callback.headers.conversation_id, conversation);
        assert_eq!(callback.tool_name, "compliance_results");
        if let CallOutcome::Success(value) = &callback.outcome {
            if value["compliant"] == true {
                compliant += 1;
            }
        }
        received.insert(callback.original_trace_id);
    }

    assert_eq!(received, sent);
    // 0, 5000 are under the limit.
    assert_eq!(compliant, 2);

    let callbacks = mesh
        .services
        .isolation
        .get_access_attempts(&Default::default(), usize::MAX)
        .into_iter()
        .filter(|attempt| attempt.operation == "callback")
        .count();
    assert_eq!(callbacks, CALLS);
}

#[tokio::test]
async fn test_callback_to_unlisted_sink_is_dropped() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    // A listener that is neither the caller nor a configured sink.
    let eavesdropper = mesh.gateway("eavesdropper", TENANT_X);
    let mut stolen = eavesdropper.subscribe_callbacks(4);
    erp.spawn_serve().unwrap();
    eavesdropper.spawn_serve().unwrap();

    let headers = Headers::new(TENANT_X, "crypto")
        .with_reply_to(ReplyTo::new("mesh", "eavesdropper", "loot").to_string());
    crypto
        .call_tool("erp", "check_compliance", json!({ "amount": 1 }), headers, None)
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(200), stolen.recv()).await.is_err());
}

// =============================================================================
// DENIALS
// =============================================================================

#[tokio::test]
async fn test_invalid_arguments_answered_with_error() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    crypto.spawn_serve().unwrap();
    erp.spawn_serve().unwrap();

    let err = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": -5 }),
            Headers::new(TENANT_X, "crypto"),
            WAIT,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, UnifiedErrorCode::DataValidationFailed);
    assert!(!err.recoverable);
    assert_eq!(
        erp.translator().error_stats()[&UnifiedErrorCode::DataValidationFailed],
        1
    );
}

#[tokio::test]
async fn test_strict_denial_escalated_and_returned() {
    let mesh = TestMesh::new(IsolationLevel::Strict).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    crypto.spawn_serve().unwrap();
    erp.spawn_serve().unwrap();

    let headers = Headers::new(TENANT_X, "crypto");
    let trace_id = headers.trace_id.clone();
    let err = crypto
        .call_tool_and_wait("erp", "check_compliance", json!({ "amount": 1 }), headers, WAIT)
        .await
        .unwrap_err();
    assert_eq!(err.code, UnifiedErrorCode::TenantIsolationViolation);
    assert_eq!(err.trace_id.as_deref(), Some(trace_id.as_str()));
    assert!(err.details.contains_key("attempt_id"));

    let escalated: Vec<_> = mesh
        .audit
        .events()
        .into_iter()
        .filter(|event| event.trace_id.as_deref() == Some(trace_id.as_str()))
        .collect();
    assert_eq!(escalated.len(), 1);
    assert_eq!(escalated[0].category, "tenant_isolation_violation");
}

#[tokio::test]
async fn test_unreachable_target_cancels_wait() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);

    let err = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": 1 }),
            Headers::new(TENANT_X, "crypto"),
            WAIT,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, UnifiedErrorCode::CommunicationFailure);
    assert_eq!(crypto.pending().pending_count(), 0);
    assert_eq!(crypto.pending().stats().total_cancelled.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_target_times_out() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    crypto.spawn_serve().unwrap();
    // Accepts messages but never answers.
    let _erp_mailbox = mesh.transport.register("erp").unwrap();

    let err = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": 1 }),
            Headers::new(TENANT_X, "crypto"),
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, UnifiedErrorCode::CommunicationTimeout);
    assert_eq!(err.retry_after, Some(5));
}

#[tokio::test]
async fn test_unsigned_callback_ignored() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let mut results = crypto.subscribe_callbacks(1);

    let headers = Headers::new(TENANT_X, "erp");
    let forged = ToolCallback {
        original_trace_id: headers.trace_id.clone(),
        headers,
        target_agent: "crypto".into(),
        tool_name: "results".into(),
        outcome: CallOutcome::Success(json!({ "compliant": true })),
    };
    assert!(!crypto.handle_callback(forged));
    assert!(results.try_recv().is_err());
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[tokio::test]
async fn test_mesh_from_toml() {
    let raw = r#"
        [security]
        max_signature_age = "60s"
        default_algorithm = "Ed25519"

        [timeouts]
        callback_wait = "5s"

        [policy]
        callback_sinks = ["collector"]

        [[policy.tenants]]
        tenant_id = "tenant-x"
        isolation_level = "permissive"

        [[policy.agents]]
        agent_id = "crypto"
        allowed_tenants = ["tenant-x"]

        [[policy.agents]]
        agent_id = "erp"
        allowed_tenants = ["tenant-x"]
        allowed_tools = ["check_compliance"]
    "#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mesh.toml");
    std::fs::write(&path, raw).unwrap();

    let config = GatewayConfig::load(&path).unwrap();
    let mesh = TestMesh::with_config(config).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    crypto.spawn_serve().unwrap();
    erp.spawn_serve().unwrap();

    let result = crypto
        .call_tool_and_wait(
            "erp",
            "check_compliance",
            json!({ "amount": 3 }),
            Headers::new(TENANT_X, "crypto"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(result["compliant"], true);
    assert!(mesh
        .services
        .signing
        .get_active_key("crypto", mesh_security::KeyAlgorithm::Ed25519)
        .is_some());
}
