//! # Breaker Flows
//!
//! Circuit breaking on the outbound path. Time is paused, so recovery
//! timeouts are crossed with `tokio::time::advance` instead of sleeping.
//!
//! ```text
//! call x3 (erp down) ──► OPEN ──► call fails fast (never sent)
//!                          │
//!            recovery_timeout elapses
//!                          ▼
//!                      HALF-OPEN ──► 2 successes ──► CLOSED
//! ```

use crate::fixtures::{mesh_policy, TestMesh, TENANT_X};
use mesh_gateway::{
    retry_with, BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState, GatewayConfig,
};
use mesh_bus::Transport;
use mesh_types::{Headers, IsolationLevel, UnifiedErrorCode};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        recovery_timeout: Duration::from_secs(60),
        ..CircuitBreakerConfig::default()
    }
}

fn mesh() -> TestMesh {
    TestMesh::with_config(GatewayConfig {
        circuit_breaker: breaker_config(),
        policy: mesh_policy(IsolationLevel::Permissive),
        ..GatewayConfig::default()
    })
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_breaker_lifecycle_for_erp() {
    let breaker = CircuitBreaker::new("erp", breaker_config());
    let invoked = AtomicU32::new(0);

    for _ in 0..3 {
        let result = breaker
            .execute(async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("erp unreachable")
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker
        .execute(async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
    assert!(matches!(rejected, Err(BreakerError::Open { .. })));
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(breaker.execute(async { Ok::<_, &str>(()) }).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.execute(async { Ok::<_, &str>(()) }).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_gateway_fails_fast_while_open() {
    let mesh = mesh();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    let call = || {
        crypto.call_tool(
            "erp",
            "check_compliance",
            json!({ "amount": 10 }),
            Headers::new(TENANT_X, "crypto"),
            None,
        )
    };

    for _ in 0..3 {
        let err = call().await.unwrap_err();
        assert_eq!(err.code, UnifiedErrorCode::CommunicationFailure);
    }

    let err = call().await.unwrap_err();
    assert_eq!(err.code, UnifiedErrorCode::CircuitBreakerOpen);
    assert!(err.recoverable);
    assert_eq!(err.retry_after, Some(60));
    assert_eq!(err.details["service"], "erp");

    // erp comes back while the breaker is still open.
    erp.spawn_serve().unwrap();
    assert_eq!(
        call().await.unwrap_err().code,
        UnifiedErrorCode::CircuitBreakerOpen
    );
    assert_eq!(mesh.transport.messages_sent(), 0);

    tokio::time::advance(Duration::from_secs(60)).await;
    call().await.unwrap();
    call().await.unwrap();

    let status = crypto.breakers().get("erp").unwrap().get_status();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.total_rejections, 2);
    assert_eq!(mesh.transport.messages_sent(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_per_target() {
    let mesh = mesh();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    erp.spawn_serve().unwrap();

    for _ in 0..3 {
        let _ = crypto
            .call_tool("ghost", "ping", json!({}), Headers::new(TENANT_X, "crypto"), None)
            .await;
    }
    assert_eq!(
        crypto.breakers().get("ghost").unwrap().state(),
        CircuitState::Open
    );

    crypto
        .call_tool(
            "erp",
            "check_compliance",
            json!({ "amount": 10 }),
            Headers::new(TENANT_X, "crypto"),
            None,
        )
        .await
        .unwrap();
    let statuses = crypto.breaker_statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].service_name, "erp");
    assert_eq!(statuses[0].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retry_outlasts_transient_outage() {
    let mesh = mesh();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let attempts = AtomicU32::new(0);
    let mailbox = Mutex::new(None);

    let ack = {
        let attempts = &attempts;
        let mailbox = &mailbox;
        let transport = Arc::clone(&mesh.transport);
        let crypto = &crypto;
        retry_with(&mesh.config.retry, move || {
            let transport = Arc::clone(&transport);
            async move {
                // erp's mailbox opens before the second attempt.
                if attempts.fetch_add(1, Ordering::SeqCst) == 1 {
                    *mailbox.lock() = Some(transport.register("erp").unwrap());
                }
                crypto
                    .call_tool(
                        "erp",
                        "check_compliance",
                        json!({ "amount": 10 }),
                        Headers::new(TENANT_X, "crypto"),
                        None,
                    )
                    .await
            }
        })
        .await
        .unwrap()
    };

    assert_eq!(ack.target, "erp");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let status = crypto.breakers().get("erp").unwrap().get_status();
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_recoverable_errors_not_retried() {
    let mesh = mesh();
    // No key provisioned: signing fails before anything is sent.
    let unkeyed = Arc::new(mesh_gateway::Gateway::new(
        "crypto",
        mesh.config.clone(),
        mesh.services.clone(),
    ));
    let attempts = AtomicU32::new(0);

    let err = {
        let attempts = &attempts;
        let unkeyed = &unkeyed;
        retry_with(&mesh.config.retry, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            unkeyed
                .call_tool("erp", "check_compliance", json!({}), Headers::new(TENANT_X, "crypto"), None)
                .await
        })
        .await
        .unwrap_err()
    };

    assert_eq!(err.code, UnifiedErrorCode::AuthenticationFailed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
