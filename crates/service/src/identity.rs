//! Ed25519 identity verification and Argon2id password hashing.
//!
//! Signatures are formed over the canonical byte layout
//! `type ‖ timestamp ‖ <message-specific fields>` and are rejected outside a
//! ±300s window around the verifier's clock (invariant 6).

use codec::crypto;

use crate::error::ServiceError;

const DEFAULT_REPLAY_WINDOW_S: u64 = 300;

#[derive(Debug, Clone, Copy)]
pub struct IdentityPolicy {
    /// Gates `SESSION_CREATE`.
    pub require_server_identity: bool,
    /// Gates `SESSION_JOIN`.
    pub require_client_identity: bool,
    pub replay_window_s: u64,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            require_server_identity: true,
            require_client_identity: true,
            replay_window_s: DEFAULT_REPLAY_WINDOW_S,
        }
    }
}

pub struct IdentityVerifier {
    policy: IdentityPolicy,
}

impl IdentityVerifier {
    pub fn new(policy: IdentityPolicy) -> Self {
        Self { policy }
    }

    pub fn validate_timestamp(&self, timestamp: u64, now_s: u64) -> Result<(), ServiceError> {
        let delta = now_s.abs_diff(timestamp);
        if delta > self.policy.replay_window_s {
            return Err(ServiceError::Crypto);
        }

        Ok(())
    }

    /// # Test
    ///
    /// ```
    /// use dss_service::identity::{IdentityPolicy, IdentityVerifier};
    /// use std::time::{SystemTime, UNIX_EPOCH};
    ///
    /// let (public, secret) = dss_codec::crypto::generate_keypair().unwrap();
    /// let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    ///
    /// let verifier = IdentityVerifier::new(IdentityPolicy::default());
    /// let sig = verifier.sign_session_create(&secret, &public, now, 0x03, 8).unwrap();
    ///
    /// assert!(verifier
    ///     .verify_session_create(&public, now, 0x03, 8, &sig, now)
    ///     .is_ok());
    /// ```
    pub fn verify_session_create(
        &self,
        pubkey: &[u8; 32],
        timestamp: u64,
        capabilities: u32,
        max_participants: u8,
        signature: &crypto::Signature,
        now_s: u64,
    ) -> Result<(), ServiceError> {
        self.validate_timestamp(timestamp, now_s)?;

        if !self.policy.require_server_identity {
            return Ok(());
        }

        let message = crypto::canonical_session_create(pubkey, timestamp, capabilities, max_participants);
        crypto::verify(pubkey, &message, signature).map_err(|_| ServiceError::Crypto)
    }

    pub fn verify_session_join(
        &self,
        pubkey: &[u8; 32],
        timestamp: u64,
        session_string: &str,
        signature: &crypto::Signature,
        now_s: u64,
    ) -> Result<(), ServiceError> {
        self.validate_timestamp(timestamp, now_s)?;

        if !self.policy.require_client_identity {
            return Ok(());
        }

        let message = crypto::canonical_session_join(pubkey, timestamp, session_string);
        crypto::verify(pubkey, &message, signature).map_err(|_| ServiceError::Crypto)
    }

    /// Forms and signs the same canonical bytes `verify_session_create`
    /// checks; used by client-side tooling, not by the server itself.
    pub fn sign_session_create(
        &self,
        pkcs8_secret: &[u8],
        pubkey: &[u8; 32],
        timestamp: u64,
        capabilities: u32,
        max_participants: u8,
    ) -> Result<crypto::Signature, ServiceError> {
        crypto::sign_session_create(pkcs8_secret, pubkey, timestamp, capabilities, max_participants)
            .map_err(|_| ServiceError::Crypto)
    }

    pub fn sign_session_join(
        &self,
        pkcs8_secret: &[u8],
        pubkey: &[u8; 32],
        timestamp: u64,
        session_string: &str,
    ) -> Result<crypto::Signature, ServiceError> {
        crypto::sign_session_join(pkcs8_secret, pubkey, timestamp, session_string).map_err(|_| ServiceError::Crypto)
    }
}

/// Hashes a password at interactive Argon2id parameters. Only used by
/// tooling and tests on the server side — in the live protocol the session
/// creator hashes its own password client-side (`§6`).
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    crypto::hash_password(password).map_err(|_| ServiceError::Internal)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    crypto::verify_password(password, hash)
}
