//! # Signing Service
//!
//! Binds `Headers::caller` to a key owned by that agent.
//!
//! ## Signature Format
//!
//! ```text
//! auth_sig = "{algorithm}|{key_id}|{signature_hex}|{timestamp}|{nonce}"
//! payload  = tenant_id|trace_id|conversation_id|caller|reply_to|timestamp|nonce
//! ```
//!
//! `reply_to` is the empty string when absent. The signed timestamp is also
//! written to `Headers::timestamp`, and the two must agree at verification.
//!
//! ## Verification Order
//!
//! 1. Exactly five fields, known algorithm, lowercase hex signature
//! 2. Key exists, is not expired and matches the algorithm
//! 3. Timestamp equals the header timestamp and lies inside
//!    `[now - max_age, now + max_future_skew]`
//! 4. Caller owns the key
//! 5. Signature matches the canonical payload

use crate::clock::{Clock, SystemClock};
use crate::errors::SigningError;
use crate::keys::{KeyAlgorithm, KeyInfo, SigningKey};
use chrono::{DateTime, Duration, Utc};
use mesh_types::{format_timestamp, parse_timestamp, Headers};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SEPARATOR: char = '|';

/// Timing rules applied when signing and verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningPolicy {
    /// Default maximum signature age.
    pub max_age: Duration,
    /// How far ahead of the verifier's clock a signature may be dated.
    pub max_future_skew: Duration,
    /// How long superseded keys keep verifying after `rotate`.
    pub rotation_grace: Duration,
    /// Lifetime of keys created by `rotate`. `None` means no expiry.
    pub key_ttl: Option<Duration>,
}

impl Default for SigningPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::seconds(300),
            max_future_skew: Duration::seconds(10),
            rotation_grace: Duration::zero(),
            key_ttl: None,
        }
    }
}

/// The parsed parts of a signature that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    pub algorithm: KeyAlgorithm,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
    pub nonce: String,
    pub owner_agent: String,
    pub owner_tenant: String,
}

#[derive(Default)]
struct KeyTable {
    keys: HashMap<String, SigningKey>,
    /// agent_id -> key ids, oldest first.
    by_agent: HashMap<String, Vec<String>>,
}

impl KeyTable {
    fn insert(&mut self, key: SigningKey) -> String {
        let key_id = key.info.key_id.clone();
        self.by_agent
            .entry(key.info.owner_agent.clone())
            .or_default()
            .push(key_id.clone());
        self.keys.insert(key_id.clone(), key);
        key_id
    }

    /// Newest unexpired key, preferring `preferred`.
    fn active_key(
        &self,
        agent_id: &str,
        preferred: KeyAlgorithm,
        now: DateTime<Utc>,
    ) -> Option<&SigningKey> {
        let live: Vec<&SigningKey> = self
            .by_agent
            .get(agent_id)?
            .iter()
            .rev()
            .filter_map(|id| self.keys.get(id))
            .filter(|key| !key.is_expired(now))
            .collect();

        live.iter()
            .find(|key| key.info.algorithm == preferred)
            .or_else(|| live.first())
            .copied()
    }
}

/// Creates, rotates and verifies per-agent signing keys.
pub struct SigningService {
    keys: RwLock<KeyTable>,
    policy: SigningPolicy,
    clock: Arc<dyn Clock>,
}

impl SigningService {
    /// Create a service with the given policy and the system clock.
    #[must_use]
    pub fn new(policy: SigningPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(policy: SigningPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: RwLock::new(KeyTable::default()),
            policy,
            clock,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &SigningPolicy {
        &self.policy
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Generate a key for `agent_id` and return its id.
    ///
    /// Key ids are unique across all agents.
    pub fn create_key(
        &self,
        agent_id: &str,
        tenant_id: &str,
        algorithm: KeyAlgorithm,
        ttl: Option<Duration>,
    ) -> String {
        let now = self.clock.now();
        let key = SigningKey::generate(
            new_key_id(),
            algorithm,
            agent_id,
            tenant_id,
            now,
            ttl.map(|ttl| now + ttl),
        );
        let key_id = self.keys.write().insert(key);
        info!(agent = agent_id, key_id = %key_id, algorithm = %algorithm, "Signing key created");
        key_id
    }

    /// Newest unexpired key for `agent_id`, preferring `preferred`.
    #[must_use]
    pub fn get_active_key(&self, agent_id: &str, preferred: KeyAlgorithm) -> Option<KeyInfo> {
        let now = self.clock.now();
        self.keys
            .read()
            .active_key(agent_id, preferred, now)
            .map(|key| key.info.clone())
    }

    /// Every key ever issued to `agent_id`, oldest first.
    #[must_use]
    pub fn keys_for_agent(&self, agent_id: &str) -> Vec<KeyInfo> {
        let table = self.keys.read();
        table
            .by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.keys.get(id))
                    .map(|key| key.info.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hex verifying key for an Ed25519 key.
    #[must_use]
    pub fn public_key(&self, key_id: &str) -> Option<String> {
        self.keys.read().keys.get(key_id)?.public_key_hex()
    }

    /// Sign `headers` as `agent_id`.
    ///
    /// Returns a copy with a fresh timestamp and `auth_sig` set.
    ///
    /// # Errors
    ///
    /// - `CallerMismatch` if `headers.caller` is not `agent_id`
    /// - `ReservedSeparator` if a header field contains `|`
    /// - `NoActiveKey` if the agent has no unexpired key
    pub fn sign(
        &self,
        headers: &Headers,
        agent_id: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<Headers, SigningError> {
        check_fields(headers)?;

        let now = self.clock.now();
        let table = self.keys.read();
        let key = table
            .active_key(agent_id, algorithm, now)
            .ok_or_else(|| SigningError::NoActiveKey(agent_id.to_string()))?;

        if headers.caller != key.info.owner_agent {
            return Err(SigningError::CallerMismatch {
                caller: headers.caller.clone(),
                key_id: key.info.key_id.clone(),
            });
        }

        let timestamp = format_timestamp(now);
        let nonce = new_nonce();
        let payload = canonical_payload(headers, &timestamp, &nonce);
        let signature = hex::encode(key.sign(payload.as_bytes())?);

        let mut signed = headers.clone();
        signed.timestamp = timestamp.clone();
        signed.auth_sig = Some(format!(
            "{}|{}|{}|{}|{}",
            key.info.algorithm, key.info.key_id, signature, timestamp, nonce
        ));

        debug!(agent = agent_id, key_id = %key.info.key_id, trace_id = %headers.trace_id, "Headers signed");
        Ok(signed)
    }

    /// Verify with the policy's default `max_age`.
    #[must_use]
    pub fn verify(&self, headers: &Headers) -> bool {
        self.verify_with_age(headers, self.policy.max_age)
    }

    /// Verify with an explicit `max_age`. Never panics and never errors.
    #[must_use]
    pub fn verify_with_age(&self, headers: &Headers, max_age: Duration) -> bool {
        match self.verify_detailed(headers, max_age) {
            Ok(_) => true,
            Err(e) => {
                debug!(caller = %headers.caller, trace_id = %headers.trace_id, error = %e, "Signature rejected");
                false
            }
        }
    }

    /// Verify and return the parsed signature, or the first failed check.
    pub fn verify_detailed(
        &self,
        headers: &Headers,
        max_age: Duration,
    ) -> Result<VerifiedSignature, SigningError> {
        let raw = headers
            .auth_sig
            .as_deref()
            .ok_or(SigningError::MissingSignature)?;

        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let [algorithm, key_id, signature_hex, timestamp, nonce] = parts.as_slice() else {
            return Err(SigningError::Malformed(format!(
                "expected 5 fields, found {}",
                parts.len()
            )));
        };

        let algorithm: KeyAlgorithm = algorithm.parse().map_err(SigningError::Malformed)?;
        if !is_lower_hex(signature_hex) || !is_lower_hex(nonce) {
            return Err(SigningError::Malformed("non-canonical hex".into()));
        }
        let signature = hex::decode(signature_hex)
            .map_err(|e| SigningError::Malformed(e.to_string()))?;

        let now = self.clock.now();
        let table = self.keys.read();
        let key = table
            .keys
            .get(*key_id)
            .ok_or_else(|| SigningError::UnknownKey((*key_id).to_string()))?;
        if key.is_expired(now) {
            return Err(SigningError::KeyExpired(key.info.key_id.clone()));
        }
        if key.info.algorithm != algorithm {
            return Err(SigningError::Malformed("algorithm does not match key".into()));
        }

        let signed_at = parse_timestamp(timestamp)
            .ok_or_else(|| SigningError::Malformed("unparseable timestamp".into()))?;
        if headers.timestamp != *timestamp {
            return Err(SigningError::TimestampMismatch);
        }
        if now - signed_at > max_age {
            return Err(SigningError::SignatureExpired);
        }
        if signed_at - now > self.policy.max_future_skew {
            return Err(SigningError::TimestampInFuture);
        }

        if headers.caller != key.info.owner_agent {
            return Err(SigningError::CallerMismatch {
                caller: headers.caller.clone(),
                key_id: key.info.key_id.clone(),
            });
        }

        check_fields(headers)?;
        let payload = canonical_payload(headers, timestamp, nonce);
        if !key.verify(payload.as_bytes(), &signature) {
            return Err(SigningError::InvalidSignature);
        }

        Ok(VerifiedSignature {
            algorithm,
            key_id: key.info.key_id.clone(),
            signed_at,
            nonce: (*nonce).to_string(),
            owner_agent: key.info.owner_agent.clone(),
            owner_tenant: key.info.owner_tenant.clone(),
        })
    }

    /// Issue new keys for `agent_id` in every algorithm and retire the old
    /// ones after `rotation_grace`.
    ///
    /// Returns the new key ids.
    ///
    /// # Errors
    ///
    /// `UnknownAgent` if the agent has never had a key.
    pub fn rotate(&self, agent_id: &str) -> Result<Vec<String>, SigningError> {
        let now = self.clock.now();
        let retire_at = now + self.policy.rotation_grace;
        let mut table = self.keys.write();

        let previous: Vec<String> = table
            .by_agent
            .get(agent_id)
            .cloned()
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| SigningError::UnknownAgent(agent_id.to_string()))?;

        let tenant = previous
            .last()
            .and_then(|id| table.keys.get(id))
            .map(|key| key.info.owner_tenant.clone())
            .unwrap_or_default();

        let created: Vec<String> = KeyAlgorithm::ALL
            .iter()
            .map(|algorithm| {
                table.insert(SigningKey::generate(
                    new_key_id(),
                    *algorithm,
                    agent_id,
                    &tenant,
                    now,
                    self.policy.key_ttl.map(|ttl| now + ttl),
                ))
            })
            .collect();

        for id in &previous {
            if let Some(key) = table.keys.get_mut(id) {
                let expires = key.info.expires_at.map_or(retire_at, |e| e.min(retire_at));
                key.info.expires_at = Some(expires);
            }
        }

        info!(
            agent = agent_id,
            retired = previous.len(),
            created = created.len(),
            "Signing keys rotated"
        );
        Ok(created)
    }

    /// Expire a single key immediately.
    pub fn revoke_key(&self, key_id: &str) -> bool {
        let now = self.clock.now();
        let mut table = self.keys.write();
        match table.keys.get_mut(key_id) {
            Some(key) => {
                key.info.expires_at = Some(now);
                warn!(key_id = key_id, agent = %key.info.owner_agent, "Signing key revoked");
                true
            }
            None => false,
        }
    }
}

fn new_key_id() -> String {
    format!("key-{}", Uuid::new_v4().simple())
}

fn new_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Fields joined into the payload may not contain the separator, otherwise
/// two different header sets could produce the same payload.
fn check_fields(headers: &Headers) -> Result<(), SigningError> {
    let fields = [
        ("tenant_id", headers.tenant_id.as_str()),
        ("trace_id", headers.trace_id.as_str()),
        ("conversation_id", headers.conversation_id.as_str()),
        ("caller", headers.caller.as_str()),
        ("reply_to", headers.reply_to.as_deref().unwrap_or("")),
    ];
    for (name, value) in fields {
        if value.contains(SEPARATOR) {
            return Err(SigningError::ReservedSeparator(name));
        }
    }
    Ok(())
}

fn canonical_payload(headers: &Headers, timestamp: &str, nonce: &str) -> String {
    [
        headers.tenant_id.as_str(),
        headers.trace_id.as_str(),
        headers.conversation_id.as_str(),
        headers.caller.as_str(),
        headers.reply_to.as_deref().unwrap_or(""),
        timestamp,
        nonce,
    ]
    .join("|")
}
