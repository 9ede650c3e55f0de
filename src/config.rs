use std::{fs::read_to_string, net::SocketAddr, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

/// One TCP listener the service accepts connections on.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Interface {
    pub listen: SocketAddr,
    ///
    /// Idle timeout
    ///
    /// A connection that has not sent a complete frame within this many
    /// seconds is closed; the deadline is re-armed on every frame received.
    ///
    #[serde(default = "Interface::idle_timeout")]
    pub idle_timeout: u32,
}

impl Interface {
    fn idle_timeout() -> u32 {
        60
    }
}

/// A STUN server advertised to clients in `SESSION_CREATED`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StunServer {
    pub url: String,
}

/// A TURN server advertised alongside ephemeral REST-API-style credentials.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TurnServer {
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// Maximum number of threads the service's tokio runtime can use.
    ///
    #[serde(default = "Server::max_threads")]
    pub max_threads: usize,
    ///
    /// Service listen interfaces.
    ///
    /// The address and port this process binds a `TcpListener` to. Multiple
    /// interfaces can be bound at the same time; ipv4 and ipv6 are both
    /// supported.
    ///
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    ///
    /// Upper bound on concurrently live sessions.
    ///
    #[serde(default = "Server::max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub stun_servers: Vec<StunServer>,
    #[serde(default)]
    pub turn_servers: Vec<TurnServer>,
    ///
    /// Shared secret used to derive ephemeral TURN credentials (the TURN
    /// REST API construction); required whenever `turn-servers` is
    /// non-empty.
    ///
    #[serde(default)]
    pub turn_secret: String,
    ///
    /// Lifetime, in seconds, of a derived TURN credential.
    ///
    #[serde(default = "Server::turn_credential_ttl")]
    pub turn_credential_ttl_s: u64,
}

impl Server {
    fn max_threads() -> usize {
        num_cpus::get()
    }

    fn max_sessions() -> usize {
        100_000
    }

    fn turn_credential_ttl() -> u64 {
        600
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            max_threads: Self::max_threads(),
            interfaces: Vec::new(),
            max_sessions: Self::max_sessions(),
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            turn_secret: String::new(),
            turn_credential_ttl_s: Self::turn_credential_ttl(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimits {
    #[serde(default = "RateLimits::session_create_count")]
    pub session_create_count: usize,
    #[serde(default = "RateLimits::session_create_window_s")]
    pub session_create_window_s: u64,
    #[serde(default = "RateLimits::session_lookup_count")]
    pub session_lookup_count: usize,
    #[serde(default = "RateLimits::session_lookup_window_s")]
    pub session_lookup_window_s: u64,
    #[serde(default = "RateLimits::session_join_count")]
    pub session_join_count: usize,
    #[serde(default = "RateLimits::session_join_window_s")]
    pub session_join_window_s: u64,
}

impl RateLimits {
    fn session_create_count() -> usize {
        5
    }

    fn session_create_window_s() -> u64 {
        60
    }

    fn session_lookup_count() -> usize {
        30
    }

    fn session_lookup_window_s() -> u64 {
        60
    }

    fn session_join_count() -> usize {
        10
    }

    fn session_join_window_s() -> u64 {
        60
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            session_create_count: Self::session_create_count(),
            session_create_window_s: Self::session_create_window_s(),
            session_lookup_count: Self::session_lookup_count(),
            session_lookup_window_s: Self::session_lookup_window_s(),
            session_join_count: Self::session_join_count(),
            session_join_window_s: Self::session_join_window_s(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    ///
    /// Require a valid `SESSION_CREATE` signature from the creator's
    /// identity key.
    ///
    #[serde(default = "Identity::require_server_identity")]
    pub require_server_identity: bool,
    ///
    /// Require a valid `SESSION_JOIN` signature from the joiner's identity
    /// key.
    ///
    #[serde(default = "Identity::require_client_identity")]
    pub require_client_identity: bool,
    ///
    /// Signature timestamps outside this window, in either direction, are
    /// rejected as a replay.
    ///
    #[serde(default = "Identity::replay_window_s")]
    pub replay_window_s: u64,
}

impl Identity {
    fn require_server_identity() -> bool {
        true
    }

    fn require_client_identity() -> bool {
        true
    }

    fn replay_window_s() -> u64 {
        300
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            require_server_identity: Self::require_server_identity(),
            require_client_identity: Self::require_client_identity(),
            replay_window_s: Self::replay_window_s(),
        }
    }
}

/// Durable snapshot storage. Absent entirely, the registry and rate limiter
/// live in memory only and do not survive a restart.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Database {
    pub path: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub database: Option<Database>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: dss-server --config /etc/dss/config.json5
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is specified,
    /// the configuration is read from the configuration file, otherwise the
    /// default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
