use std::sync::Arc;

use crate::{config::Config, statistics::Statistics};

/// Logs service-level events and forwards them into [`Statistics`]. Mirrors
/// the embedding application's hook into connection lifecycle events, just
/// for discovery/session events instead of allocation ones.
#[derive(Clone)]
pub struct Observer {
    #[allow(dead_code)]
    config: Arc<Config>,
    statistics: Statistics,
}

impl Observer {
    pub fn new(config: Arc<Config>, statistics: Statistics) -> Self {
        Self { config, statistics }
    }
}

impl service::ServiceHandler for Observer {
    fn on_session_created(&self, session_id: &[u8; 16], session_string: &str) {
        log::info!("session created: id={session_id:02x?}, string={session_string}");
        self.statistics.sessions_created.add(1);
    }

    fn on_session_joined(&self, session_id: &[u8; 16], participant_id: &[u8; 16], current_participants: u8) {
        log::info!(
            "session joined: id={session_id:02x?}, participant={participant_id:02x?}, count={current_participants}"
        );
        self.statistics.sessions_joined.add(1);
    }

    fn on_session_left(&self, session_id: &[u8; 16], participant_id: &[u8; 16]) {
        log::info!("session left: id={session_id:02x?}, participant={participant_id:02x?}");
        self.statistics.sessions_left.add(1);
    }

    fn on_host_announced(&self, session_id: &[u8; 16], host_id: &[u8; 16]) {
        log::info!("host announced: id={session_id:02x?}, host={host_id:02x?}");
        self.statistics.host_announcements.add(1);
    }

    fn on_rate_limited(&self, ip: &str, event_class: &str) {
        log::warn!("rate limited: ip={ip}, class={event_class}");
        self.statistics.rate_limited.add(1);
    }
}
