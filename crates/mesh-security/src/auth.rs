//! # Authentication Service
//!
//! Outbound signing and inbound verification for one agent. Inbound
//! verification consumes the signature's nonce, so a captured message cannot
//! be delivered twice inside its validity window.

use crate::errors::SigningError;
use crate::keys::KeyAlgorithm;
use crate::signing::{SigningService, VerifiedSignature};
use chrono::Duration;
use mesh_bus::{NonceCache, NonceError};
use mesh_types::Headers;
use std::sync::Arc;
use tracing::warn;

/// Signs on behalf of one agent and authenticates whatever it receives.
pub struct AuthenticationService {
    agent_id: String,
    signing: Arc<SigningService>,
    nonces: NonceCache,
    algorithm: KeyAlgorithm,
    max_age: Duration,
}

impl AuthenticationService {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, signing: Arc<SigningService>, algorithm: KeyAlgorithm) -> Self {
        let max_age = signing.policy().max_age;
        // Pairs must outlive both the age window and the permitted future skew.
        let window = max_age + signing.policy().max_future_skew;
        Self {
            agent_id: agent_id.into(),
            signing,
            nonces: NonceCache::new(window),
            algorithm,
            max_age,
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[must_use]
    pub fn signing(&self) -> &Arc<SigningService> {
        &self.signing
    }

    /// Sign outgoing headers as this agent.
    pub fn sign_outbound(&self, headers: &Headers) -> Result<Headers, SigningError> {
        self.signing.sign(headers, &self.agent_id, self.algorithm)
    }

    /// Sign unless a signature is already attached.
    pub fn ensure_signed(&self, headers: &Headers) -> Result<Headers, SigningError> {
        if headers.is_signed() {
            Ok(headers.clone())
        } else {
            self.sign_outbound(headers)
        }
    }

    /// Verify the signature without consuming the nonce.
    #[must_use]
    pub fn verify(&self, headers: &Headers) -> bool {
        self.signing.verify_with_age(headers, self.max_age)
    }

    /// Verify inbound headers and reject replays.
    pub fn validate_inbound(&self, headers: &Headers) -> Result<VerifiedSignature, SigningError> {
        let verified = self.signing.verify_detailed(headers, self.max_age)?;
        let now = self.signing.clock().now();

        self.nonces
            .check_and_insert(&verified.key_id, &verified.nonce, verified.signed_at, now)
            .map_err(|NonceError::NonceReused { key_id, nonce }| {
                warn!(caller = %headers.caller, key_id = %key_id, trace_id = %headers.trace_id, "Replayed signature rejected");
                SigningError::ReplayDetected { key_id, nonce }
            })?;

        Ok(verified)
    }

    /// Number of nonces currently remembered.
    #[must_use]
    pub fn remembered_nonces(&self) -> usize {
        self.nonces.len()
    }
}
