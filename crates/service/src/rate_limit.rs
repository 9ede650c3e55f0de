//! Per-IP token buckets keyed by event class, backed by a durable event
//! store so a restart does not reset an attacker's budget.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::persistence::Persistence;

const RETENTION_MS: u64 = 3600 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    SessionCreate,
    SessionLookup,
    SessionJoin,
}

impl EventClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionCreate => "SESSION_CREATE",
            Self::SessionLookup => "SESSION_LOOKUP",
            Self::SessionJoin => "SESSION_JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub count: usize,
    pub window_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub session_create: Limit,
    pub session_lookup: Limit,
    pub session_join: Limit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            session_create: Limit { count: 5, window_ms: 60_000 },
            session_lookup: Limit { count: 30, window_ms: 60_000 },
            session_join: Limit { count: 10, window_ms: 60_000 },
        }
    }
}

impl RateLimitConfig {
    fn limit(&self, class: EventClass) -> Limit {
        match class {
            EventClass::SessionCreate => self.session_create,
            EventClass::SessionLookup => self.session_lookup,
            EventClass::SessionJoin => self.session_join,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-IP, per-class insertion-timestamped event lists.
pub struct RateLimiter {
    config: RateLimitConfig,
    events: RwLock<AHashMap<(String, EventClass), Vec<u64>>>,
    persistence: Option<Arc<Persistence>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, persistence: Option<Arc<Persistence>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            events: RwLock::new(AHashMap::new()),
            persistence,
        })
    }

    /// Replays durable events recorded before a restart so attacker budgets
    /// carry over.
    pub async fn load(&self) -> anyhow::Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let rows = persistence.load_rate_events().await?;
        let mut events = self.events.write();

        for (ip, class, ts_ms) in rows {
            let Some(class) = parse_class(&class) else {
                continue;
            };

            events.entry((ip, class)).or_default().push(ts_ms);
        }

        Ok(())
    }

    /// Accepts or rejects one event. On accept, the event is recorded both
    /// in memory and — best-effort — in the durable store.
    ///
    /// # Test
    ///
    /// ```
    /// use dss_service::rate_limit::{EventClass, Limit, RateLimitConfig, RateLimiter};
    ///
    /// let config = RateLimitConfig {
    ///     session_create: Limit { count: 2, window_ms: 60_000 },
    ///     ..RateLimitConfig::default()
    /// };
    ///
    /// let limiter = RateLimiter::new(config, None);
    ///
    /// assert!(limiter.check("203.0.113.1", EventClass::SessionCreate));
    /// assert!(limiter.check("203.0.113.1", EventClass::SessionCreate));
    /// assert!(!limiter.check("203.0.113.1", EventClass::SessionCreate));
    /// ```
    pub fn check(&self, ip: &str, class: EventClass) -> bool {
        let limit = self.config.limit(class);
        let now = now_ms();
        let cutoff = now.saturating_sub(limit.window_ms);

        let mut events = self.events.write();
        let entry = events.entry((ip.to_string(), class)).or_default();
        entry.retain(|ts| *ts > cutoff);

        if entry.len() >= limit.count {
            return false;
        }

        entry.push(now);

        if let Some(persistence) = &self.persistence {
            persistence.record_rate_event_nonblocking(ip.to_string(), class.as_str().to_string(), now);
        }

        true
    }

    /// Drops every event older than the one-hour retention window, in
    /// memory and in the durable store.
    pub async fn prune(&self) -> anyhow::Result<()> {
        let cutoff = now_ms().saturating_sub(RETENTION_MS);

        {
            let mut events = self.events.write();
            events.retain(|_, ts| {
                ts.retain(|t| *t > cutoff);
                !ts.is_empty()
            });
        }

        if let Some(persistence) = &self.persistence {
            persistence.prune_rate_events(cutoff).await?;
        }

        Ok(())
    }

    /// Runs the periodic prune as a background task until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }

            if let Err(error) = self.prune().await {
                log::warn!("rate limit prune failed: {error}");
            }
        }
    }
}

fn parse_class(s: &str) -> Option<EventClass> {
    match s {
        "SESSION_CREATE" => Some(EventClass::SessionCreate),
        "SESSION_LOOKUP" => Some(EventClass::SessionLookup),
        "SESSION_JOIN" => Some(EventClass::SessionJoin),
        _ => None,
    }
}
