//! # Isolation Flows
//!
//! Policy decisions made by the shared `TenantIsolationEngine`, observed both
//! directly and through a gateway's inbound path.
//!
//! Every decision appends exactly one access record, so the access log is a
//! complete audit trail even under concurrent load.

use crate::fixtures::{mesh_policy, TestMesh, TENANT_X, TENANT_Y};
use futures::future::join_all;
use mesh_gateway::InboundResponse;
use mesh_security::{AccessFilter, IsolationError, TenantIsolationEngine, DEFAULT_LOG_CAPACITY};
use mesh_types::{Headers, IsolationLevel, ToolCall, UnifiedErrorCode};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn call_on(target: &str, tool: &str, headers: Headers) -> ToolCall {
    ToolCall {
        headers,
        target_agent: target.into(),
        tool_name: tool.into(),
        arguments: json!({ "amount": 1 }),
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

/// crypto belongs to tenant-x only; ledger is scoped to tenant-y.
#[tokio::test]
async fn test_cross_tenant_call_denied() {
    let mesh = TestMesh::new(IsolationLevel::Strict).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let ledger = mesh.compliance_gateway("ledger", TENANT_Y);

    let headers = Headers::new(TENANT_Y, "crypto");
    let err = mesh
        .services
        .isolation
        .validate_access(&headers, "ledger", "check_compliance", "call_tool")
        .unwrap_err();
    assert!(matches!(err, IsolationError::CrossTenantAccess { .. }));

    let signed = crypto.auth().sign_outbound(&headers).unwrap();
    let InboundResponse::Rejected(err) =
        ledger.handle_inbound(call_on("ledger", "check_compliance", signed))
    else {
        panic!("cross-tenant call was admitted");
    };
    assert_eq!(err.code, UnifiedErrorCode::CrossTenantViolation);
    assert!(!err.recoverable);

    let stats = mesh.services.isolation.get_tenant_stats(TENANT_Y);
    assert_eq!(stats.cross_tenant_violations, 2);
    assert_eq!(stats.allowed, 0);
}

#[tokio::test]
async fn test_strict_tenant_requires_orchestrator() {
    let mesh = TestMesh::new(IsolationLevel::Strict).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);

    let denied = crypto
        .auth()
        .sign_outbound(&Headers::new(TENANT_X, "crypto"))
        .unwrap();
    let InboundResponse::Rejected(err) =
        erp.handle_inbound(call_on("erp", "check_compliance", denied))
    else {
        panic!("strict isolation admitted a peer call");
    };
    assert_eq!(err.code, UnifiedErrorCode::TenantIsolationViolation);

    mesh.services.isolation.add_orchestrator("crypto");
    let allowed = crypto
        .auth()
        .sign_outbound(&Headers::new(TENANT_X, "crypto"))
        .unwrap();
    assert!(erp
        .handle_inbound(call_on("erp", "check_compliance", allowed))
        .is_accepted());
}

#[test]
fn test_blocked_agent_denied_everywhere() {
    let engine = TenantIsolationEngine::new(mesh_policy(IsolationLevel::Shared), 100);
    let headers = Headers::new(TENANT_X, "crypto");
    assert!(engine
        .validate_access(&headers, "erp", "check_compliance", "call_tool")
        .is_ok());

    engine.block_agent("crypto", "compromised key");
    let err = engine
        .validate_access(&headers, "erp", "check_compliance", "call_tool")
        .unwrap_err();
    assert_eq!(err.reason(), "caller is blocked");

    assert!(engine.unblock_agent("crypto"));
    assert!(engine
        .validate_access(&headers, "erp", "check_compliance", "call_tool")
        .is_ok());
}

#[test]
fn test_decisions_are_deterministic() {
    let engine = TenantIsolationEngine::new(mesh_policy(IsolationLevel::Strict), 100);
    let headers = Headers::new(TENANT_X, "crypto");

    for round in 1..=5 {
        let decision = engine
            .validate_access(&headers, "erp", "check_compliance", "call_tool")
            .map(|grant| grant.reason)
            .map_err(|err| err.reason().to_string());
        assert_eq!(
            decision,
            Err("strict isolation forbids cross-agent call".to_string())
        );
        assert_eq!(engine.access_log().len(), round);
    }
}

// =============================================================================
// AUDIT COMPLETENESS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_each_audited_once() {
    const N: usize = 200;
    let engine = Arc::new(TenantIsolationEngine::new(
        mesh_policy(IsolationLevel::Permissive),
        DEFAULT_LOG_CAPACITY,
    ));

    let tasks = (0..N).map(|i| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            // Odd callers ask for a tool erp does not expose.
            let tool = if i % 2 == 0 { "check_compliance" } else { "publish_signal" };
            let headers = Headers::new(TENANT_X, "crypto");
            engine
                .validate_access(&headers, "erp", tool, "call_tool")
                .is_ok()
        })
    });
    let outcomes: Vec<bool> = join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(outcomes.iter().filter(|allowed| **allowed).count(), N / 2);

    let records = engine.get_access_attempts(&AccessFilter::default(), usize::MAX);
    assert_eq!(records.len(), N);
    let ids: HashSet<_> = records.iter().map(|r| r.attempt_id.as_str()).collect();
    assert_eq!(ids.len(), N);

    let stats = engine.get_tenant_stats(TENANT_X);
    assert_eq!(stats.allowed, N / 2);
    assert_eq!(stats.denied, N / 2);
    assert_eq!(stats.distinct_callers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inbound_calls_audited() {
    const N: usize = 64;
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);

    let tasks = (0..N).map(|i| {
        let erp = Arc::clone(&erp);
        let headers = crypto
            .auth()
            .sign_outbound(&Headers::new(TENANT_X, "crypto"))
            .unwrap();
        tokio::spawn(async move {
            let tool = if i % 4 == 0 { "publish_signal" } else { "check_compliance" };
            erp.handle_inbound(call_on("erp", tool, headers)).is_accepted()
        })
    });
    let accepted = join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(|accepted| *accepted)
        .count();
    assert_eq!(accepted, N - N / 4);

    let log = mesh.services.isolation.access_log();
    assert_eq!(log.len(), N);
    let denied = mesh.services.isolation.get_access_attempts(
        &AccessFilter::tenant(TENANT_X).with_allowed(false),
        usize::MAX,
    );
    assert_eq!(denied.len(), N / 4);
    assert!(denied.iter().all(|r| r.tool_name == "publish_signal"));

    // Every denial was escalated as an isolation violation.
    let escalated = mesh
        .audit
        .events()
        .into_iter()
        .filter(|e| e.category == UnifiedErrorCode::TenantIsolationViolation.as_str())
        .count();
    assert_eq!(escalated, N / 4);
}

#[test]
fn test_access_log_is_bounded() {
    let engine = TenantIsolationEngine::new(mesh_policy(IsolationLevel::Shared), 10);
    let headers = Headers::new(TENANT_X, "crypto");
    for _ in 0..25 {
        let _ = engine.validate_access(&headers, "erp", "check_compliance", "call_tool");
    }
    assert_eq!(engine.access_log().len(), 10);
    assert_eq!(engine.access_log().total_appended(), 25);
    assert_eq!(engine.access_log().total_evicted(), 15);
}
