//! # Signing Keys
//!
//! Per-agent key material. HMAC keys are 32 random bytes; Ed25519 keys are
//! freshly generated keypairs. Secret bytes are zeroized when a key is
//! dropped and never appear in `Debug` output.

use crate::errors::SigningError;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, Verifier};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
    #[serde(rename = "Ed25519")]
    Ed25519,
}

impl KeyAlgorithm {
    pub const ALL: [KeyAlgorithm; 2] = [KeyAlgorithm::HmacSha256, KeyAlgorithm::Ed25519];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::HmacSha256 => "HMAC-SHA256",
            KeyAlgorithm::Ed25519 => "Ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HMAC-SHA256" => Ok(KeyAlgorithm::HmacSha256),
            "Ed25519" => Ok(KeyAlgorithm::Ed25519),
            other => Err(format!("unsupported algorithm {other}")),
        }
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct HmacSecret([u8; 32]);

enum KeyMaterial {
    Hmac(HmacSecret),
    Ed25519(ed25519_dalek::SigningKey),
}

/// Public view of a key. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub owner_agent: String,
    pub owner_tenant: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A key owned by exactly one agent.
pub struct SigningKey {
    pub(crate) info: KeyInfo,
    material: KeyMaterial,
}

impl SigningKey {
    pub(crate) fn generate(
        key_id: String,
        algorithm: KeyAlgorithm,
        owner_agent: &str,
        owner_tenant: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let material = match algorithm {
            KeyAlgorithm::HmacSha256 => {
                let mut secret = [0u8; 32];
                rng.fill_bytes(&mut secret);
                let material = KeyMaterial::Hmac(HmacSecret(secret));
                secret.zeroize();
                material
            }
            KeyAlgorithm::Ed25519 => {
                KeyMaterial::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng))
            }
        };

        Self {
            info: KeyInfo {
                key_id,
                algorithm,
                owner_agent: owner_agent.to_string(),
                owner_tenant: owner_tenant.to_string(),
                created_at,
                expires_at,
            },
            material,
        }
    }

    #[must_use]
    pub fn info(&self) -> &KeyInfo {
        &self.info
    }

    /// Expired keys never sign and never verify.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.info.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Hex-encoded verifying key. `None` for symmetric keys.
    #[must_use]
    pub fn public_key_hex(&self) -> Option<String> {
        match &self.material {
            KeyMaterial::Hmac(_) => None,
            KeyMaterial::Ed25519(key) => Some(hex::encode(key.verifying_key().as_bytes())),
        }
    }

    pub(crate) fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        match &self.material {
            KeyMaterial::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(&secret.0)
                    .map_err(|e| SigningError::Crypto(e.to_string()))?;
                mac.update(payload);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            KeyMaterial::Ed25519(key) => Ok(key.sign(payload).to_bytes().to_vec()),
        }
    }

    pub(crate) fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        match &self.material {
            KeyMaterial::Hmac(secret) => {
                let Ok(mut mac) = HmacSha256::new_from_slice(&secret.0) else {
                    return false;
                };
                mac.update(payload);
                let expected = mac.finalize().into_bytes();
                expected.len() == signature.len()
                    && bool::from(expected.as_slice().ct_eq(signature))
            }
            KeyMaterial::Ed25519(key) => {
                let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                key.verifying_key().verify(payload, &signature).is_ok()
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("info", &self.info)
            .field("material", &"<redacted>")
            .finish()
    }
}
