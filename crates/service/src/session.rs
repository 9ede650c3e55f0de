//! The session registry: the only mutable store of session records.
//!
//! Each session is wrapped in its own `Arc<RwLock<Session>>` and indexed by
//! both `session_id` and `session_string` in separate [`dashmap::DashMap`]s.
//! Readers take a per-record lock, not a registry-wide one, so a write to one
//! session never blocks a lookup of another — `dashmap`'s sharded internal
//! locking gives lock-free iteration over the index itself.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use codec::crypto::random_id;
use dashmap::DashMap;
use parking_lot::RwLock;

/// Re-exported rather than redefined: the registry's notion of a session's
/// transport and the wire's `SESSION_CREATE`/`SESSION_JOINED` field are the
/// same value end to end, so there is exactly one `SessionType` in the
/// workspace.
pub use codec::message::SessionType;

pub const SESSION_STRING_LEN: usize = 48;
pub const DEFAULT_MAX_PARTICIPANTS: u8 = 32;
pub const SESSION_STRING_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SESSION_LIFETIME_MS: u64 = 24 * 3600 * 1000;

#[derive(Debug, Clone)]
pub struct Participant {
    pub participant_id: [u8; 16],
    pub identity_pubkey: [u8; 32],
    pub joined_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct FutureHost {
    pub elected_round: u64,
    pub future_host_id: [u8; 16],
    pub future_host_addr: String,
    pub future_host_port: u16,
    pub future_host_connection_type: SessionType,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: [u8; 16],
    pub session_string: String,
    pub host_pubkey: [u8; 32],
    pub host_participant_id: [u8; 16],
    pub capabilities: u32,
    pub max_participants: u8,
    pub password_hash: Option<String>,
    pub expose_ip_publicly: bool,
    pub session_type: SessionType,
    pub server_address: String,
    pub server_port: u16,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub participants: Vec<Participant>,
    pub future_host: Option<FutureHost>,
    pub migrating: bool,
    pub migration_started_ms: Option<u64>,
}

impl Session {
    pub fn current_participants(&self) -> u8 {
        self.participants.len() as u8
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

pub struct CreateRequest {
    pub reserved_string: Option<String>,
    pub host_pubkey: [u8; 32],
    pub capabilities: u32,
    pub max_participants: u8,
    pub password_hash: Option<String>,
    pub expose_ip_publicly: bool,
    pub session_type: SessionType,
    pub server_address: String,
    pub server_port: u16,
}

pub struct JoinRequest {
    pub session_string: String,
    pub identity_pubkey: [u8; 32],
    pub password: Option<String>,
}

#[derive(Debug)]
pub enum RegistryError {
    AlreadyExists,
    InvalidParam,
    Capacity,
    NotFound,
    Full,
    WrongPassword,
    PasswordRequired,
    OutOfMemory,
}

pub struct RegistryOptions {
    pub max_sessions: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self { max_sessions: 100_000 }
    }
}

/// The session registry.
///
/// `by_id` owns the records; `by_string` is a secondary index mapping
/// `session_string -> session_id` and is kept consistent with `by_id` inside
/// the same critical section on every mutating operation (invariant 4).
pub struct Registry {
    by_id: DashMap<[u8; 16], Arc<RwLock<Session>>, ahash::RandomState>,
    by_string: DashMap<String, [u8; 16], ahash::RandomState>,
    max_sessions: usize,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn valid_session_string(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= SESSION_STRING_LEN
        && s.bytes().all(|b| SESSION_STRING_ALPHABET.contains(&b))
}

fn generate_session_string() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    (0..10)
        .map(|_| SESSION_STRING_ALPHABET[rng.random_range(0..SESSION_STRING_ALPHABET.len())] as char)
        .collect()
}

impl Registry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            by_id: DashMap::with_hasher(ahash::RandomState::new()),
            by_string: DashMap::with_hasher(ahash::RandomState::new()),
            max_sessions: options.max_sessions,
        }
    }

    /// Creates a new session.
    ///
    /// # Test
    ///
    /// ```
    /// use dss_service::session::{CreateRequest, Registry, RegistryOptions, SessionType};
    ///
    /// let registry = Registry::new(RegistryOptions::default());
    /// let created = registry
    ///     .create(CreateRequest {
    ///         reserved_string: Some("ALFA-BRAVO".into()),
    ///         host_pubkey: [1u8; 32],
    ///         capabilities: 0x03,
    ///         max_participants: 8,
    ///         password_hash: None,
    ///         expose_ip_publicly: true,
    ///         session_type: SessionType::DirectTcp,
    ///         server_address: "203.0.113.1".into(),
    ///         server_port: 27224,
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(created.session_string, "ALFA-BRAVO");
    /// assert_eq!(created.current_participants(), 1);
    /// assert_eq!(registry.find_by_string("ALFA-BRAVO").is_some(), true);
    /// ```
    pub fn create(&self, req: CreateRequest) -> Result<Session, RegistryError> {
        if self.by_id.len() >= self.max_sessions {
            return Err(RegistryError::Capacity);
        }

        let session_string = match req.reserved_string {
            Some(s) => {
                if !valid_session_string(&s) {
                    return Err(RegistryError::InvalidParam);
                }

                if self.by_string.contains_key(&s) {
                    return Err(RegistryError::AlreadyExists);
                }

                s
            }
            None => {
                let mut candidate = generate_session_string();
                while self.by_string.contains_key(&candidate) {
                    candidate = generate_session_string();
                }

                candidate
            }
        };

        let session_id = random_id().map_err(|_| RegistryError::OutOfMemory)?;
        let host_participant_id = random_id().map_err(|_| RegistryError::OutOfMemory)?;
        let created_at_ms = now_ms();

        // The creator occupies a participant slot from the start — it is
        // not a distinct kind of membership, just the first join.
        let host = Participant {
            participant_id: host_participant_id,
            identity_pubkey: req.host_pubkey,
            joined_at_ms: created_at_ms,
        };

        let session = Session {
            session_id,
            session_string: session_string.clone(),
            host_pubkey: req.host_pubkey,
            host_participant_id,
            capabilities: req.capabilities,
            max_participants: if req.max_participants == 0 {
                DEFAULT_MAX_PARTICIPANTS
            } else {
                req.max_participants
            },
            password_hash: req.password_hash,
            expose_ip_publicly: req.expose_ip_publicly,
            session_type: req.session_type,
            server_address: req.server_address,
            server_port: req.server_port,
            created_at_ms,
            expires_at_ms: created_at_ms + SESSION_LIFETIME_MS,
            participants: vec![host],
            future_host: None,
            migrating: false,
            migration_started_ms: None,
        };

        self.by_string.insert(session_string, session_id);
        self.by_id.insert(session_id, Arc::new(RwLock::new(session.clone())));

        Ok(session)
    }

    /// Read-only lookup by session string; never discloses address/port.
    pub fn lookup(&self, session_string: &str) -> Option<Session> {
        self.find_by_string(session_string)
    }

    pub fn find_by_string(&self, session_string: &str) -> Option<Session> {
        let id = *self.by_string.get(session_string)?;
        self.find_by_id(&id)
    }

    pub fn find_by_id(&self, session_id: &[u8; 16]) -> Option<Session> {
        self.by_id.get(session_id).map(|entry| entry.read().clone())
    }

    /// Joins a participant into a session.
    ///
    /// Verifying the password (if any) and mutating the slot array happen
    /// inside the same per-session write lock, so a concurrent join cannot
    /// observe a torn `current_participants`.
    pub fn join(&self, req: JoinRequest) -> Result<(Session, [u8; 16]), RegistryError> {
        let id = *self
            .by_string
            .get(&req.session_string)
            .ok_or(RegistryError::NotFound)?;

        let entry = self.by_id.get(&id).ok_or(RegistryError::NotFound)?;
        let mut session = entry.write();

        if session.expires_at_ms < now_ms() {
            drop(session);
            self.remove(&id);
            return Err(RegistryError::NotFound);
        }

        if let Some(hash) = &session.password_hash {
            match &req.password {
                None => return Err(RegistryError::PasswordRequired),
                Some(pw) => {
                    if !crate::identity::verify_password(pw, hash) {
                        return Err(RegistryError::WrongPassword);
                    }
                }
            }
        }

        if session.participants.len() >= session.max_participants as usize {
            return Err(RegistryError::Full);
        }

        let participant_id = random_id().map_err(|_| RegistryError::OutOfMemory)?;
        session.participants.push(Participant {
            participant_id,
            identity_pubkey: req.identity_pubkey,
            joined_at_ms: now_ms(),
        });

        Ok((session.clone(), participant_id))
    }

    /// Removes a participant; removes the session too if it becomes empty
    /// (invariant 2 — the session id is never reused).
    pub fn leave(&self, session_id: &[u8; 16], participant_id: &[u8; 16]) -> Result<(), RegistryError> {
        let entry = self.by_id.get(session_id).ok_or(RegistryError::NotFound)?;
        let empty = {
            let mut session = entry.write();
            let before = session.participants.len();
            session.participants.retain(|p| &p.participant_id != participant_id);

            if session.participants.len() == before {
                return Err(RegistryError::NotFound);
            }

            session.participants.is_empty()
        };

        drop(entry);

        if empty {
            self.remove(session_id);
        }

        Ok(())
    }

    fn remove(&self, session_id: &[u8; 16]) {
        if let Some((_, session)) = self.by_id.remove(session_id) {
            self.by_string.remove(&session.read().session_string);
        }
    }

    /// Removes every session whose `expires_at_ms < now_ms`.
    pub fn cleanup_expired(&self, now_ms: u64) -> usize {
        let expired: Vec<[u8; 16]> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().read().expires_at_ms < now_ms)
            .map(|entry| *entry.key())
            .collect();

        for id in &expired {
            self.remove(id);
        }

        expired.len()
    }

    pub fn update_host(
        &self,
        session_id: &[u8; 16],
        host_participant_id: [u8; 16],
        addr: String,
        port: u16,
        connection_type: SessionType,
    ) -> Result<(), RegistryError> {
        let entry = self.by_id.get(session_id).ok_or(RegistryError::NotFound)?;
        let mut session = entry.write();
        session.server_address = addr;
        session.server_port = port;
        session.session_type = connection_type;
        session.host_participant_id = host_participant_id;
        session.migrating = false;
        session.migration_started_ms = None;
        Ok(())
    }

    pub fn clear_host(&self, session_id: &[u8; 16]) -> Result<(), RegistryError> {
        let entry = self.by_id.get(session_id).ok_or(RegistryError::NotFound)?;
        let mut session = entry.write();
        session.server_address.clear();
        session.server_port = 0;
        Ok(())
    }

    pub fn start_migration(&self, session_id: &[u8; 16]) -> Result<(), RegistryError> {
        let entry = self.by_id.get(session_id).ok_or(RegistryError::NotFound)?;
        let mut session = entry.write();

        if !session.migrating {
            session.migrating = true;
            session.migration_started_ms = Some(now_ms());
        }

        Ok(())
    }

    pub fn set_future_host(&self, session_id: &[u8; 16], future_host: FutureHost) -> Result<(), RegistryError> {
        let entry = self.by_id.get(session_id).ok_or(RegistryError::NotFound)?;
        entry.write().future_host = Some(future_host);
        Ok(())
    }

    /// True once a session has been in `migrating` state for at least
    /// `window_ms` without a successful `update_host` — the dispatcher uses
    /// this to decide whether a stalled migration should fail the session.
    pub fn is_migration_ready(&self, session_id: &[u8; 16], window_ms: u64) -> bool {
        match self.find_by_id(session_id) {
            Some(session) => match session.migration_started_ms {
                Some(started_ms) => session.migrating && now_ms().saturating_sub(started_ms) >= window_ms,
                None => false,
            },
            None => false,
        }
    }

    /// Safe iteration over a consistent snapshot of every live session.
    /// Concurrent writers may mutate unrelated records while this iterates.
    pub fn for_each(&self, mut f: impl FnMut(&Session)) {
        for entry in self.by_id.iter() {
            f(&entry.read());
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Inserts a session that has already been validated once, used only by
    /// the snapshot loader at startup.
    pub(crate) fn insert_raw(&self, session: Session) {
        self.by_string.insert(session.session_string.clone(), session.session_id);
        self.by_id.insert(session.session_id, Arc::new(RwLock::new(session)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(reserved: Option<&str>) -> CreateRequest {
        CreateRequest {
            reserved_string: reserved.map(String::from),
            host_pubkey: [1u8; 32],
            capabilities: 0,
            max_participants: 2,
            password_hash: None,
            expose_ip_publicly: true,
            session_type: SessionType::DirectTcp,
            server_address: "203.0.113.1".into(),
            server_port: 1234,
        }
    }

    #[test]
    fn duplicate_reserved_string_fails() {
        let registry = Registry::new(RegistryOptions::default());
        assert!(registry.create(req(Some("DUP"))).is_ok());
        assert!(matches!(
            registry.create(req(Some("DUP"))),
            Err(RegistryError::AlreadyExists)
        ));
    }

    #[test]
    fn full_session_rejects_extra_joiner() {
        let registry = Registry::new(RegistryOptions::default());
        let created = registry.create(req(Some("FULL"))).unwrap();
        assert_eq!(created.current_participants(), 1);

        // The host already occupies one of the two slots, so only one more
        // join succeeds before the session is full.
        for i in 0..(created.max_participants - 1) {
            let result = registry.join(JoinRequest {
                session_string: "FULL".into(),
                identity_pubkey: [i; 32],
                password: None,
            });
            assert!(result.is_ok());
        }

        let overflow = registry.join(JoinRequest {
            session_string: "FULL".into(),
            identity_pubkey: [99; 32],
            password: None,
        });

        assert!(matches!(overflow, Err(RegistryError::Full)));
    }

    #[test]
    fn leave_removes_empty_session() {
        let registry = Registry::new(RegistryOptions::default());
        let created = registry.create(req(Some("LONE"))).unwrap();

        let (_, pid) = registry
            .join(JoinRequest {
                session_string: "LONE".into(),
                identity_pubkey: [1; 32],
                password: None,
            })
            .unwrap();

        // Both the host and the joiner must leave before the session is gone.
        registry.leave(&created.session_id, &created.host_participant_id).unwrap();
        assert!(registry.find_by_string("LONE").is_some());

        registry.leave(&created.session_id, &pid).unwrap();
        assert!(registry.find_by_string("LONE").is_none());
    }

    #[test]
    fn leave_unknown_participant_is_error() {
        let registry = Registry::new(RegistryOptions::default());
        let created = registry.create(req(Some("SOLO"))).unwrap();

        let result = registry.leave(&created.session_id, &[9u8; 16]);
        assert!(result.is_err());
        assert!(registry.find_by_string("SOLO").is_some());
    }
}
