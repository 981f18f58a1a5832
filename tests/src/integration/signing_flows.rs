//! # Signing Flows
//!
//! Headers signed by one gateway and admitted (or not) by another:
//!
//! 1. **Round trip**: a signed call is admitted exactly once
//! 2. **Tampering**: any change to a signed field is rejected
//! 3. **Replay window**: signatures expire after `max_signature_age`
//! 4. **Rotation**: calls signed with a retired key are rejected

use crate::fixtures::{TestMesh, TENANT_X};
use chrono::Duration as ChronoDuration;
use mesh_gateway::{Gateway, InboundResponse};
use mesh_security::{KeyAlgorithm, ManualClock, SigningError};
use mesh_types::{Headers, IsolationLevel, ToolCall, UnifiedErrorCode};
use serde_json::json;
use std::sync::Arc;

// =============================================================================
// TEST FIXTURES
// =============================================================================

fn signed_call(caller: &Gateway, headers: &Headers) -> ToolCall {
    ToolCall {
        headers: caller.auth().sign_outbound(headers).unwrap(),
        target_agent: "erp".into(),
        tool_name: "check_compliance".into(),
        arguments: json!({ "amount": 100 }),
    }
}

fn rejected_with(response: InboundResponse) -> UnifiedErrorCode {
    match response {
        InboundResponse::Rejected(err) => err.code,
        InboundResponse::Accepted(ack) => panic!("call was accepted: {ack:?}"),
    }
}

// =============================================================================
// ROUND TRIP
// =============================================================================

#[tokio::test]
async fn test_signed_call_admitted_once() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);

    let call = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    assert!(mesh.services.signing.verify(&call.headers));

    assert!(erp.handle_inbound(call.clone()).is_accepted());
    assert_eq!(erp.auth().remembered_nonces(), 1);

    // The same bytes a second time are a replay.
    assert_eq!(
        rejected_with(erp.handle_inbound(call)),
        UnifiedErrorCode::AuthenticationFailed
    );
}

#[tokio::test]
async fn test_tampered_headers_rejected() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    let headers = Headers::new(TENANT_X, "crypto");

    let mut retargeted = signed_call(&crypto, &headers);
    retargeted.headers.tenant_id = "tenant-y".into();
    assert_eq!(
        rejected_with(erp.handle_inbound(retargeted)),
        UnifiedErrorCode::AuthenticationFailed
    );

    let mut impersonated = signed_call(&crypto, &headers);
    impersonated.headers.caller = "erp".into();
    assert_eq!(
        rejected_with(erp.handle_inbound(impersonated)),
        UnifiedErrorCode::AuthenticationFailed
    );

    let mut truncated = signed_call(&crypto, &headers);
    if let Some(sig) = truncated.headers.auth_sig.as_mut() {
        sig.pop();
    }
    assert_eq!(
        rejected_with(erp.handle_inbound(truncated)),
        UnifiedErrorCode::AuthenticationFailed
    );

    // Nothing tampered reached the isolation engine.
    assert!(erp.isolation().access_log().is_empty());
}

#[tokio::test]
async fn test_ed25519_mesh() {
    let mut mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    mesh.config.security.default_algorithm = KeyAlgorithm::Ed25519;
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);

    let key_id = mesh
        .services
        .signing
        .get_active_key("crypto", KeyAlgorithm::Ed25519)
        .unwrap()
        .key_id;
    assert!(mesh.services.signing.public_key(&key_id).is_some());

    let call = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    assert!(call
        .headers
        .auth_sig
        .as_deref()
        .unwrap()
        .starts_with("Ed25519|"));
    assert!(erp.handle_inbound(call).is_accepted());
}

// =============================================================================
// REPLAY WINDOW
// =============================================================================

#[tokio::test]
async fn test_signature_expires_after_max_age() {
    let clock = Arc::new(ManualClock::starting_now());
    let mesh = TestMesh::new(IsolationLevel::Permissive)
        .unwrap()
        .with_clock(clock.clone())
        .unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);
    let max_age = mesh.services.signing.policy().max_age;

    let call = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));

    clock.advance(max_age - ChronoDuration::seconds(1));
    assert!(mesh.services.signing.verify(&call.headers));

    clock.advance(ChronoDuration::seconds(2));
    assert!(!mesh.services.signing.verify(&call.headers));
    assert_eq!(
        mesh.services
            .signing
            .verify_detailed(&call.headers, max_age)
            .unwrap_err(),
        SigningError::SignatureExpired
    );
    assert_eq!(
        rejected_with(erp.handle_inbound(call)),
        UnifiedErrorCode::AuthenticationFailed
    );
}

#[tokio::test]
async fn test_future_dated_signature_rejected() {
    let clock = Arc::new(ManualClock::starting_now());
    let mesh = TestMesh::new(IsolationLevel::Permissive)
        .unwrap()
        .with_clock(clock.clone())
        .unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);

    clock.advance(ChronoDuration::minutes(5));
    let call = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    clock.advance(ChronoDuration::minutes(-5));

    assert!(!mesh.services.signing.verify(&call.headers));
}

// =============================================================================
// ROTATION
// =============================================================================

#[tokio::test]
async fn test_rotation_retires_previous_key() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);
    let erp = mesh.compliance_gateway("erp", TENANT_X);

    let in_flight = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    let created = mesh.services.signing.rotate("crypto").unwrap();
    assert_eq!(created.len(), KeyAlgorithm::ALL.len());

    assert!(!mesh.services.signing.verify(&in_flight.headers));
    assert_eq!(
        rejected_with(erp.handle_inbound(in_flight)),
        UnifiedErrorCode::AuthenticationFailed
    );

    let fresh = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    assert!(erp.handle_inbound(fresh).is_accepted());
}

#[tokio::test]
async fn test_rotation_grace_keeps_in_flight_calls() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    mesh.config.security.rotation_grace = std::time::Duration::from_secs(30);
    let mesh = TestMesh::with_config(mesh.config)
        .unwrap()
        .with_clock(clock.clone())
        .unwrap();
    let crypto = mesh.gateway("crypto", TENANT_X);

    let in_flight = signed_call(&crypto, &Headers::new(TENANT_X, "crypto"));
    mesh.services.signing.rotate("crypto").unwrap();
    assert!(mesh.services.signing.verify(&in_flight.headers));

    clock.advance(ChronoDuration::seconds(31));
    assert!(!mesh.services.signing.verify(&in_flight.headers));
}

#[test]
fn test_unknown_agent_cannot_rotate() {
    let mesh = TestMesh::new(IsolationLevel::Permissive).unwrap();
    assert_eq!(
        mesh.services.signing.rotate("ghost").unwrap_err(),
        SigningError::UnknownAgent("ghost".into())
    );
}
