//! Durable snapshot of active sessions and rate-limit events.
//!
//! On startup the registry is repopulated from this store, discarding any
//! session whose `expires_at_ms` has already passed; on a timer, every live
//! session is written back. This is a best-effort snapshot, not a
//! write-ahead log — a crash between snapshots loses at most one interval's
//! worth of session churn.

use std::sync::Arc;

use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

use crate::session::{Participant, Registry, Session, SessionType};

pub struct Persistence {
    pool: SqlitePool,
}

impl Persistence {
    pub async fn connect(database_path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{database_path}?mode=rwc"))
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                session_string TEXT NOT NULL UNIQUE,
                host_pubkey TEXT NOT NULL,
                host_participant_id TEXT NOT NULL,
                capabilities INTEGER NOT NULL,
                max_participants INTEGER NOT NULL,
                session_type INTEGER NOT NULL,
                has_password INTEGER NOT NULL,
                password_hash TEXT,
                server_address TEXT NOT NULL,
                server_port INTEGER NOT NULL,
                expose_ip_publicly INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                participant_id TEXT NOT NULL,
                identity_pubkey TEXT NOT NULL,
                joined_at_ms INTEGER NOT NULL,
                PRIMARY KEY (session_id, participant_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_events (
                ip TEXT NOT NULL,
                event_class TEXT NOT NULL,
                ts_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Loads every non-expired session (and its participants) into `registry`.
    pub async fn restore(&self, registry: &Registry, now_ms: u64) -> anyhow::Result<usize> {
        let rows = sqlx::query(
            "SELECT session_id, session_string, host_pubkey, host_participant_id, capabilities, \
             max_participants, session_type, has_password, password_hash, server_address, server_port, \
             expose_ip_publicly, created_at_ms, expires_at_ms FROM sessions WHERE expires_at_ms >= ?",
        )
        .bind(now_ms as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut restored = 0;

        for row in rows {
            let session_id = hex_to_16(row.get::<String, _>("session_id"))?;
            let host_pubkey = hex_to_32(row.get::<String, _>("host_pubkey"))?;
            let host_participant_id = hex_to_16(row.get::<String, _>("host_participant_id"))?;

            let participant_rows = sqlx::query(
                "SELECT participant_id, identity_pubkey, joined_at_ms FROM participants WHERE session_id = ?",
            )
            .bind(hex::encode(session_id))
            .fetch_all(&self.pool)
            .await?;

            let mut participants = Vec::with_capacity(participant_rows.len());
            for p in participant_rows {
                participants.push(Participant {
                    participant_id: hex_to_16(p.get::<String, _>("participant_id"))?,
                    identity_pubkey: hex_to_32(p.get::<String, _>("identity_pubkey"))?,
                    joined_at_ms: p.get::<i64, _>("joined_at_ms") as u64,
                });
            }

            let session = Session {
                session_id,
                session_string: row.get("session_string"),
                host_pubkey,
                host_participant_id,
                capabilities: row.get::<i64, _>("capabilities") as u32,
                max_participants: row.get::<i64, _>("max_participants") as u8,
                password_hash: row.get("password_hash"),
                expose_ip_publicly: row.get::<i64, _>("expose_ip_publicly") != 0,
                session_type: if row.get::<i64, _>("session_type") == 0 {
                    SessionType::DirectTcp
                } else {
                    SessionType::WebRtc
                },
                server_address: row.get("server_address"),
                server_port: row.get::<i64, _>("server_port") as u16,
                created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
                expires_at_ms: row.get::<i64, _>("expires_at_ms") as u64,
                participants,
                future_host: None,
                migrating: false,
                migration_started_ms: None,
            };

            registry.restore_session(session);
            restored += 1;
        }

        Ok(restored)
    }

    /// Writes every live session and its participants, replacing prior rows.
    pub async fn snapshot(&self, registry: &Registry) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM participants").execute(&mut *tx).await?;

        let mut sessions = Vec::new();
        registry.for_each(|session| sessions.push(session.clone()));

        for session in &sessions {
            sqlx::query(
                "INSERT INTO sessions (session_id, session_string, host_pubkey, host_participant_id, \
                 capabilities, max_participants, session_type, has_password, password_hash, server_address, \
                 server_port, expose_ip_publicly, created_at_ms, expires_at_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(hex::encode(session.session_id))
            .bind(&session.session_string)
            .bind(hex::encode(session.host_pubkey))
            .bind(hex::encode(session.host_participant_id))
            .bind(session.capabilities as i64)
            .bind(session.max_participants as i64)
            .bind(matches!(session.session_type, SessionType::WebRtc) as i64)
            .bind(session.has_password() as i64)
            .bind(&session.password_hash)
            .bind(&session.server_address)
            .bind(session.server_port as i64)
            .bind(session.expose_ip_publicly as i64)
            .bind(session.created_at_ms as i64)
            .bind(session.expires_at_ms as i64)
            .execute(&mut *tx)
            .await?;

            for participant in &session.participants {
                sqlx::query(
                    "INSERT INTO participants (session_id, participant_id, identity_pubkey, joined_at_ms) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(hex::encode(session.session_id))
                .bind(hex::encode(participant.participant_id))
                .bind(hex::encode(participant.identity_pubkey))
                .bind(participant.joined_at_ms as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_rate_events(&self) -> anyhow::Result<Vec<(String, String, u64)>> {
        let rows = sqlx::query("SELECT ip, event_class, ts_ms FROM rate_events")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("ip"),
                    row.get("event_class"),
                    row.get::<i64, _>("ts_ms") as u64,
                )
            })
            .collect())
    }

    pub async fn record_rate_event(&self, ip: String, event_class: String, ts_ms: u64) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO rate_events (ip, event_class, ts_ms) VALUES (?, ?, ?)")
            .bind(ip)
            .bind(event_class)
            .bind(ts_ms as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fire-and-forget variant for use from the synchronous rate-limiter
    /// hot path; logs but does not propagate a failed write.
    pub fn record_rate_event_nonblocking(self: &Arc<Self>, ip: String, event_class: String, ts_ms: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(error) = this.record_rate_event(ip, event_class, ts_ms).await {
                log::warn!("failed to persist rate-limit event: {error}");
            }
        });
    }

    pub async fn prune_rate_events(&self, cutoff_ms: u64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM rate_events WHERE ts_ms < ?")
            .bind(cutoff_ms as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl Registry {
    /// Inserts a session restored from the snapshot directly, bypassing the
    /// usual `create` validation (the record already went through it once).
    pub fn restore_session(&self, session: Session) {
        self.insert_raw(session);
    }
}

fn hex_to_16(s: String) -> anyhow::Result<[u8; 16]> {
    let bytes = hex::decode(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 16 bytes"))
}

fn hex_to_32(s: String) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(s)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 32 bytes"))
}

/// Minimal hex encode/decode so the snapshot store does not need to pull in
/// an extra dependency solely for this.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: String) -> anyhow::Result<Vec<u8>> {
        if s.len() % 2 != 0 {
            anyhow::bail!("odd-length hex string");
        }

        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(anyhow::Error::from))
            .collect()
    }
}
