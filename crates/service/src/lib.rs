pub mod error;
pub mod identity;
pub mod persistence;
pub mod rate_limit;
pub mod relay;
pub mod session;

use std::sync::{Arc, atomic::AtomicBool};

use identity::{IdentityPolicy, IdentityVerifier};
use persistence::Persistence;
use rate_limit::{RateLimitConfig, RateLimiter};
use relay::Relay;
use session::{Registry, RegistryOptions};

/// Hooks a caller can implement to observe service-level events without
/// reaching into the registry itself — mirrors how connection lifecycle
/// events are surfaced to an embedding application.
pub trait ServiceHandler: Send + Sync {
    /// A session was created; `session_string` is the token participants
    /// will share out of band to find it.
    #[allow(unused_variables)]
    fn on_session_created(&self, session_id: &[u8; 16], session_string: &str) {}

    /// A participant joined a session. `current_participants` reflects the
    /// count immediately after the join.
    #[allow(unused_variables)]
    fn on_session_joined(&self, session_id: &[u8; 16], participant_id: &[u8; 16], current_participants: u8) {}

    /// A participant left, whether by explicit `SESSION_LEAVE` or by a
    /// dropped connection detected by the sweep.
    #[allow(unused_variables)]
    fn on_session_left(&self, session_id: &[u8; 16], participant_id: &[u8; 16]) {}

    /// A new host took over `session_id`, either at creation or after a
    /// migration.
    #[allow(unused_variables)]
    fn on_host_announced(&self, session_id: &[u8; 16], host_id: &[u8; 16]) {}

    /// An IP was rejected by the rate limiter for `event_class`.
    #[allow(unused_variables)]
    fn on_rate_limited(&self, ip: &str, event_class: &str) {}
}

pub struct ServiceOptions<T> {
    pub rate_limit: RateLimitConfig,
    pub identity_policy: IdentityPolicy,
    pub registry: RegistryOptions,
    pub persistence: Option<Arc<Persistence>>,
    pub turn_secret: Vec<u8>,
    /// Lifetime, in seconds, of a derived TURN credential (`§6`).
    pub turn_credential_ttl_s: u64,
    /// STUN/TURN server counts advertised in `SESSION_CREATED` (`§4.5`); the
    /// server lists themselves live in the embedding config, not here.
    pub stun_count: u16,
    pub turn_count: u16,
    pub handler: T,
}

/// The composition root handed to every connection's dispatcher, replacing
/// the source's process-wide singletons for the registry, rate limiter, and
/// identity policy with a single reference-counted handle that `main` owns
/// and tears down in reverse order of construction.
#[derive(Clone)]
pub struct ServiceContext<T> {
    pub registry: Arc<Registry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub identity: Arc<IdentityVerifier>,
    pub relay: Arc<Relay>,
    pub persistence: Option<Arc<Persistence>>,
    pub turn_secret: Arc<Vec<u8>>,
    pub turn_credential_ttl_s: u64,
    pub stun_count: u16,
    pub turn_count: u16,
    pub handler: T,
    pub shutdown: Arc<AtomicBool>,
}

impl<T> ServiceContext<T>
where
    T: ServiceHandler + Clone + 'static,
{
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self {
            registry: Arc::new(Registry::new(options.registry)),
            rate_limiter: RateLimiter::new(options.rate_limit, options.persistence.clone()),
            identity: Arc::new(IdentityVerifier::new(options.identity_policy)),
            relay: Arc::new(Relay::new()),
            persistence: options.persistence,
            turn_secret: Arc::new(options.turn_secret),
            turn_credential_ttl_s: options.turn_credential_ttl_s,
            stun_count: options.stun_count,
            turn_count: options.turn_count,
            handler: options.handler,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Loads the durable snapshot (sessions + rate-limit events) into this
    /// context's registry and rate limiter. Called once at startup, before
    /// the listener starts accepting connections.
    pub async fn restore(&self) -> anyhow::Result<()> {
        self.rate_limiter.load().await?;

        if let Some(persistence) = &self.persistence {
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;

            let restored = persistence.restore(&self.registry, now_ms).await?;
            log::info!("restored {restored} sessions from snapshot");
        }

        Ok(())
    }

    pub fn spawn_background_tasks(&self) {
        tokio::spawn(self.rate_limiter.clone().run_sweeper(self.shutdown.clone()));
        tokio::spawn(expiry_sweeper(self.registry.clone(), self.shutdown.clone()));

        if let Some(persistence) = self.persistence.clone() {
            tokio::spawn(snapshot_writer(self.registry.clone(), persistence, self.shutdown.clone()));
        }
    }
}

/// Periodically removes expired sessions (`§4.2`'s `cleanup_expired`).
async fn expiry_sweeper(registry: Arc<Registry>, shutdown: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));

    loop {
        interval.tick().await;

        if shutdown.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let removed = registry.cleanup_expired(now_ms);
        if removed > 0 {
            log::info!("expired {removed} sessions");
        }
    }
}

/// Periodically snapshots the registry to durable storage.
async fn snapshot_writer(registry: Arc<Registry>, persistence: Arc<Persistence>, shutdown: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));

    loop {
        interval.tick().await;

        if shutdown.load(std::sync::atomic::Ordering::Relaxed) {
            if let Err(error) = persistence.snapshot(&registry).await {
                log::warn!("final snapshot failed: {error}");
            }

            return;
        }

        if let Err(error) = persistence.snapshot(&registry).await {
            log::warn!("snapshot failed: {error}");
        }
    }
}
