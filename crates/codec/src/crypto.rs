use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use aws_lc_rs::{
    hmac,
    rand::SystemRandom,
    signature::{self, Ed25519KeyPair, KeyPair},
};

use crate::Error;

/// Ed25519 signature, 64 bytes.
pub type Signature = [u8; 64];

/// Verifies an Ed25519 signature over `message` using a 32-byte public key.
///
/// # Test
///
/// ```
/// use dss_codec::crypto::{generate_keypair, sign, verify};
///
/// let (public, secret) = generate_keypair().unwrap();
/// let message = b"session-create-canonical-bytes";
///
/// let sig = sign(&secret, message).unwrap();
/// assert!(verify(&public, message, &sig).is_ok());
/// assert!(verify(&public, b"tampered", &sig).is_err());
/// ```
pub fn verify(public_key: &[u8; 32], message: &[u8], sig: &Signature) -> Result<(), Error> {
    let key = signature::UnparsedPublicKey::new(&signature::ED25519, public_key);
    key.verify(message, sig).map_err(|_| Error::InvalidInput)
}

/// Signs `message` with a PKCS#8-encoded Ed25519 private key.
pub fn sign(pkcs8_secret: &[u8], message: &[u8]) -> Result<Signature, Error> {
    let pair = Ed25519KeyPair::from_pkcs8(pkcs8_secret).map_err(|_| Error::InvalidInput)?;
    let sig = pair.sign(message);

    let mut out = [0u8; 64];
    out.copy_from_slice(sig.as_ref());
    Ok(out)
}

/// Generates a fresh Ed25519 keypair, returned as `(public_key, pkcs8_secret)`.
///
/// Used by tests and by client tooling that needs a throwaway identity; the
/// DSS itself never generates identity keys on behalf of a peer.
pub fn generate_keypair() -> Result<([u8; 32], Vec<u8>), Error> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| Error::InvalidInput)?;
    let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| Error::InvalidInput)?;

    let mut public = [0u8; 32];
    public.copy_from_slice(pair.public_key().as_ref());
    Ok((public, pkcs8.as_ref().to_vec()))
}

/// HMAC-SHA256 over an arbitrary number of buffers, used to derive ephemeral
/// TURN credentials from a server secret.
///
/// # Test
///
/// ```
/// use dss_codec::crypto::hmac_sha256;
///
/// let a = hmac_sha256(b"server-secret", &[b"ALFA-BRAVO", b"1700000000", b"600"]).unwrap();
/// let b = hmac_sha256(b"server-secret", &[b"ALFA-BRAVO", b"1700000000", b"600"]).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn hmac_sha256(key: &[u8], source: &[&[u8]]) -> Result<[u8; 32], Error> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut ctx = hmac::Context::with_key(&key);

    for buf in source {
        ctx.update(buf);
    }

    let tag = ctx.sign();
    let mut out = [0u8; 32];
    out.copy_from_slice(tag.as_ref());
    Ok(out)
}

/// Derives a TURN REST-API-style ephemeral username/credential pair.
///
/// `username` is `"{expires_at_s}:{session_string}"`; `credential` is the
/// base64 of `HMAC-SHA256(secret, username)`, mirroring the construction
/// described by the TURN REST API draft this service's credential scheme is
/// modeled on.
pub fn turn_credential(
    secret: &[u8],
    session_string: &str,
    expires_at_s: u64,
) -> Result<(String, String), Error> {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let username = format!("{expires_at_s}:{session_string}");
    let tag = hmac_sha256(secret, &[username.as_bytes()])?;
    Ok((username, STANDARD.encode(tag)))
}

/// Canonical byte layout signed/verified for `SESSION_CREATE`:
/// `type‖timestamp‖pubkey‖capabilities‖max_participants` (`§4.3`/invariant 6).
///
/// Shared by the server's verifier and the client's signer so the two sides
/// can never drift on wire layout.
pub fn canonical_session_create(pubkey: &[u8; 32], timestamp: u64, capabilities: u32, max_participants: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + 32 + 4 + 1);
    buf.push(0x01);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(pubkey);
    buf.extend_from_slice(&capabilities.to_be_bytes());
    buf.push(max_participants);
    buf
}

/// Canonical byte layout signed/verified for `SESSION_JOIN`:
/// `type‖timestamp‖pubkey‖session_string`.
pub fn canonical_session_join(pubkey: &[u8; 32], timestamp: u64, session_string: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + 32 + session_string.len());
    buf.push(0x05);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(pubkey);
    buf.extend_from_slice(session_string.as_bytes());
    buf
}

/// Signs the canonical `SESSION_CREATE` bytes; used by the client state
/// machine, mirrored on the server side by `verify_session_create`.
pub fn sign_session_create(
    pkcs8_secret: &[u8],
    pubkey: &[u8; 32],
    timestamp: u64,
    capabilities: u32,
    max_participants: u8,
) -> Result<Signature, Error> {
    sign(pkcs8_secret, &canonical_session_create(pubkey, timestamp, capabilities, max_participants))
}

/// Signs the canonical `SESSION_JOIN` bytes.
pub fn sign_session_join(
    pkcs8_secret: &[u8],
    pubkey: &[u8; 32],
    timestamp: u64,
    session_string: &str,
) -> Result<Signature, Error> {
    sign(pkcs8_secret, &canonical_session_join(pubkey, timestamp, session_string))
}

/// Hashes a password at interactive Argon2id parameters. The session
/// creator hashes its own chosen session password client-side; the DSS never
/// sees the plaintext at creation time, only at join (`§6`).
///
/// # Test
///
/// ```
/// use dss_codec::crypto::{hash_password, verify_password};
///
/// let hash = hash_password("correct-horse").unwrap();
/// assert!(verify_password("correct-horse", &hash));
/// assert!(!verify_password("wrong", &hash));
/// ```
pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::InvalidInput)
}

/// Verifies a password against an Argon2id hash produced by [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// Generates a random 128-bit id with UUIDv4 version/variant bits set, used
/// for session ids and participant ids.
///
/// # Test
///
/// ```
/// use dss_codec::crypto::random_id;
///
/// let id = random_id().unwrap();
/// assert_eq!(id[6] >> 4, 4);
/// assert_eq!(id[8] >> 6, 0b10);
/// ```
pub fn random_id() -> Result<[u8; 16], Error> {
    use aws_lc_rs::rand::SecureRandom;

    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes).map_err(|_| Error::InvalidInput)?;

    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Ok(bytes)
}
