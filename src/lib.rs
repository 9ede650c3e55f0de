pub mod config;
pub mod observer;
pub mod server;
pub mod statistics;

use std::sync::{Arc, atomic::Ordering};

use self::{config::Config, observer::Observer, statistics::Statistics};

use service::{
    ServiceContext, ServiceOptions,
    identity::IdentityPolicy,
    persistence::Persistence,
    rate_limit::{Limit, RateLimitConfig},
    session::RegistryOptions,
};

/// Starts every configured listener, restores the snapshot, and runs until
/// a shutdown signal is observed. Split out of `main` so integration tests
/// can drive a full service instance directly.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let statistics = Statistics::default();

    let persistence = match &config.database {
        Some(database) => Some(Arc::new(Persistence::connect(&database.path).await?)),
        None => None,
    };

    let ctx = Arc::new(ServiceContext::new(ServiceOptions {
        rate_limit: RateLimitConfig {
            session_create: Limit {
                count: config.rate_limits.session_create_count,
                window_ms: config.rate_limits.session_create_window_s * 1000,
            },
            session_lookup: Limit {
                count: config.rate_limits.session_lookup_count,
                window_ms: config.rate_limits.session_lookup_window_s * 1000,
            },
            session_join: Limit {
                count: config.rate_limits.session_join_count,
                window_ms: config.rate_limits.session_join_window_s * 1000,
            },
        },
        identity_policy: IdentityPolicy {
            require_server_identity: config.identity.require_server_identity,
            require_client_identity: config.identity.require_client_identity,
            replay_window_s: config.identity.replay_window_s,
        },
        registry: RegistryOptions {
            max_sessions: config.server.max_sessions,
        },
        persistence,
        turn_secret: config.server.turn_secret.clone().into_bytes(),
        turn_credential_ttl_s: config.server.turn_credential_ttl_s,
        stun_count: config.server.stun_servers.len() as u16,
        turn_count: config.server.turn_servers.len() as u16,
        handler: Observer::new(config.clone(), statistics.clone()),
    }));

    ctx.restore().await?;
    ctx.spawn_background_tasks();

    for interface in config.server.interfaces.clone() {
        server::listener(interface, ctx.clone()).await?;
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, draining");
    ctx.shutdown.store(true, Ordering::Relaxed);

    Ok(())
}
