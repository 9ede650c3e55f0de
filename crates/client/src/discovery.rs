//! Drives one peer through the discovery lifecycle: connect to the service,
//! create or join a session, negotiate a host with the other participant,
//! hold the connection open while the session is active, and recover via the
//! pre-elected successor if the host disappears.
//!
//! The state machine is a single sequential driver, not a task pool — every
//! wait is cancellable so an embedder can poll `should_exit` to stop a peer
//! cleanly from another thread.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use codec::{
    Frame,
    crypto,
    election::{self, Candidate},
    message::{
        ErrorCode, ErrorFrame, FutureHostElected, HostAnnouncement, HostLost, NatQuality,
        NetworkQuality, PacketType, SdpType, SessionCreate, SessionCreated, SessionJoin,
        SessionJoined, WebrtcSdp,
    },
};
use rand::Rng;

use crate::connection::{self, Connection};

pub use codec::message::SessionType;

const LIVENESS_INTERVAL: Duration = Duration::from_secs(3);
const LIVENESS_FAILURE_LIMIT: u32 = 3;
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);
const FUTURE_HOST_INTERVAL: Duration = Duration::from_secs(5 * 60);
const POLL_SLICE: Duration = Duration::from_millis(100);

const HOST_LOST_REASON_LIVENESS: u8 = 1;

/// States of the discovery client, `§4.8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    ConnectingAcds,
    CreatingSession,
    WaitingPeer,
    JoiningSession,
    Negotiating,
    StartingHost,
    ConnectingHost,
    Active,
    Migrating,
    BecomeHost,
    Ended,
    Failed,
}

#[derive(Debug)]
pub enum DiscoveryError {
    Connection(connection::Error),
    Codec(codec::Error),
    /// The service rejected a request with a wire-level error code.
    Protocol(ErrorCode, String),
    /// A wait exceeded its deadline without the expected frame arriving.
    Timeout,
    /// `should_exit` tripped while a wait was in flight.
    Cancelled,
    /// Migration did not reach `ACTIVE` within the configured window.
    MigrationTimedOut,
    /// The WebRTC branch exhausted `webrtc_reconnect_attempts`.
    WebrtcExhausted,
    /// A frame of an unexpected type arrived for the current state.
    UnexpectedPacket(u16),
}

impl From<connection::Error> for DiscoveryError {
    fn from(value: connection::Error) -> Self {
        Self::Connection(value)
    }
}

impl From<codec::Error> for DiscoveryError {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

impl std::error::Error for DiscoveryError {}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Supplies NAT-quality descriptors. The DSS wire protocol only carries the
/// descriptor (`§4.7`); the actual probing (STUN binding requests and the
/// like) is an external collaborator's concern.
pub trait NatProbe: Send + Sync {
    fn probe(&self) -> NatQuality;
}

/// A probe that always reports the same descriptor. Useful for tests and for
/// deployments that already know their own network posture.
pub struct StaticNatProbe(pub NatQuality);

impl NatProbe for StaticNatProbe {
    fn probe(&self) -> NatQuality {
        self.0
    }
}

/// Checks whether the current host is still reachable. Pinging happens on
/// the direct peer-to-peer transport, not the DSS connection, so this is
/// left pluggable — the DSS hands off a connected transport and never sees
/// it again (`§1`, non-goals).
pub trait HostLivenessProbe: Send + Sync {
    fn ping_host(&self) -> bool;
}

pub struct AlwaysAliveProbe;

impl HostLivenessProbe for AlwaysAliveProbe {
    fn ping_host(&self) -> bool {
        true
    }
}

/// Drives the local half of a WebRTC offer/answer/ICE exchange. Actual SDP
/// and candidate generation belongs to a media stack this crate does not
/// carry; this crate only drives the signaling exchange over the relay.
pub trait SignalingSource: Send + Sync {
    fn local_offer(&self) -> String;
    fn local_answer(&self, remote_offer: &str) -> String;
    fn local_candidates(&self) -> Vec<(String, String)>;
    fn add_remote_candidate(&self, candidate: &str, mid: &str);
    fn gathering_complete(&self) -> bool;
}

/// Hooks an embedder can implement to observe state transitions and errors
/// without polling `DiscoveryClient::state()`.
pub trait DiscoveryHandler: Send + Sync {
    #[allow(unused_variables)]
    fn on_state_changed(&self, from: State, to: State) {}

    #[allow(unused_variables)]
    fn on_error(&self, code: Option<ErrorCode>, message: &str) {}

    #[allow(unused_variables)]
    fn on_host_changed(&self, host_id: [u8; 16], address: &str, port: u16) {}
}

pub struct NoopHandler;

impl DiscoveryHandler for NoopHandler {}

pub struct DiscoveryConfig {
    pub server_addr: std::net::SocketAddr,
    pub identity_pubkey: [u8; 32],
    pub identity_secret: Vec<u8>,
    /// `None` creates a new session; `Some` joins an existing one.
    pub session_string: Option<String>,
    pub password: Option<String>,
    pub capabilities: u32,
    pub max_participants: u8,
    pub session_type: SessionType,
    pub own_address: String,
    pub own_port: u16,
    pub expose_ip_publicly: bool,
    pub connect_timeout: Duration,
    pub migration_timeout: Duration,
    pub ice_gather_timeout: Duration,
    pub webrtc_reconnect_attempts: u32,
    /// When set, exhausting WebRTC retries fails the session instead of
    /// falling back to direct TCP (`§4.8`).
    pub prefer_webrtc: bool,
}

impl DiscoveryConfig {
    pub fn new(server_addr: std::net::SocketAddr, identity_pubkey: [u8; 32], identity_secret: Vec<u8>) -> Self {
        Self {
            server_addr,
            identity_pubkey,
            identity_secret,
            session_string: None,
            password: None,
            capabilities: 0,
            max_participants: 2,
            session_type: SessionType::DirectTcp,
            own_address: String::new(),
            own_port: 0,
            expose_ip_publicly: true,
            connect_timeout: Duration::from_secs(10),
            migration_timeout: Duration::from_secs(30),
            ice_gather_timeout: Duration::from_secs(20),
            webrtc_reconnect_attempts: 5,
            prefer_webrtc: false,
        }
    }
}

fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Drives one peer through the discovery lifecycle described by `§4.8`.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    handler: Box<dyn DiscoveryHandler>,
    nat_probe: Box<dyn NatProbe>,
    liveness_probe: Box<dyn HostLivenessProbe>,
    signaling: Box<dyn SignalingSource>,
    connection: Connection,
    state: State,
    session_id: [u8; 16],
    session_string: String,
    participant_id: [u8; 16],
    peer_id: [u8; 16],
    peer_quality: Option<NatQuality>,
    session_type: SessionType,
    is_host: bool,
    is_future_host: bool,
    host_address: String,
    host_port: u16,
}

impl DiscoveryClient {
    pub async fn connect(
        config: DiscoveryConfig,
        handler: Box<dyn DiscoveryHandler>,
        nat_probe: Box<dyn NatProbe>,
        liveness_probe: Box<dyn HostLivenessProbe>,
        signaling: Box<dyn SignalingSource>,
    ) -> Result<Self, DiscoveryError> {
        let connect = Connection::connect(config.server_addr);
        let connection = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => return Err(DiscoveryError::Timeout),
        };

        let session_type = config.session_type;

        Ok(Self {
            config,
            handler,
            nat_probe,
            liveness_probe,
            signaling,
            connection,
            state: State::ConnectingAcds,
            session_id: [0u8; 16],
            session_string: String::new(),
            participant_id: [0u8; 16],
            peer_id: [0u8; 16],
            peer_quality: None,
            session_type,
            is_host: false,
            is_future_host: false,
            host_address: String::new(),
            host_port: 0,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session_id(&self) -> [u8; 16] {
        self.session_id
    }

    pub fn session_string(&self) -> &str {
        &self.session_string
    }

    fn transition(&mut self, to: State) {
        let from = self.state;
        self.state = to;
        self.handler.on_state_changed(from, to);
    }

    /// Runs the full state machine to completion: `ACTIVE` loops until the
    /// session ends, is failed by a migration timeout, or `should_exit`
    /// trips. `should_exit` is polled at least every 100 ms (`§5`).
    pub async fn run(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let result = self.run_inner(should_exit).await;

        if let Err(error) = &result {
            if self.state != State::Ended {
                self.transition(State::Failed);
            }

            if let DiscoveryError::Protocol(code, message) = error {
                self.handler.on_error(Some(*code), message);
            } else {
                self.handler.on_error(None, &error.to_string());
            }
        }

        result
    }

    async fn run_inner(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        if let Some(session_string) = self.config.session_string.clone() {
            self.transition(State::JoiningSession);
            self.join_session(&session_string, should_exit).await?;
        } else {
            self.transition(State::CreatingSession);
            self.create_session(should_exit).await?;
        }

        if self.state != State::ConnectingHost {
            self.negotiate(should_exit).await?;
        }

        match self.state {
            State::StartingHost => self.announce_as_host(should_exit).await?,
            State::ConnectingHost => {
                if self.session_type == SessionType::WebRtc {
                    self.negotiate_webrtc(should_exit).await?;
                }
            }
            _ => {}
        }

        self.transition(State::Active);
        self.run_active(should_exit).await
    }

    async fn create_session(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let timestamp = now_s();
        let signature = crypto::sign_session_create(
            &self.config.identity_secret,
            &self.config.identity_pubkey,
            timestamp,
            self.config.capabilities,
            self.config.max_participants,
        )
        .map_err(|_| DiscoveryError::Protocol(ErrorCode::Crypto, "failed to sign SESSION_CREATE".into()))?;

        let password_hash = match &self.config.password {
            Some(password) => Some(
                crypto::hash_password(password)
                    .map_err(|_| DiscoveryError::Protocol(ErrorCode::Internal, "failed to hash password".into()))?,
            ),
            None => None,
        };

        let request = SessionCreate {
            identity: self.config.identity_pubkey,
            timestamp,
            signature,
            capabilities: self.config.capabilities,
            max_participants: self.config.max_participants,
            session_type: self.config.session_type,
            password_hash,
            server_address: self.config.own_address.clone(),
            server_port: self.config.own_port,
            expose_ip_publicly: self.config.expose_ip_publicly,
            reserved_string: None,
        };

        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);
        self.connection.send(PacketType::SessionCreate.into(), &buf).await?;

        let deadline = Instant::now() + self.config.connect_timeout;
        let frame = self.recv_cancellable(deadline, should_exit).await?;
        self.expect(frame.packet_type, PacketType::SessionCreated)?;

        let created = SessionCreated::decode(frame.payload)?;
        self.session_id = created.session_id;
        self.session_string = created.session_string;
        self.participant_id = created.participant_id;
        self.is_host = true;
        self.host_address = self.config.own_address.clone();
        self.host_port = self.config.own_port;

        self.transition(State::WaitingPeer);
        self.wait_for_peer(should_exit).await
    }

    async fn wait_for_peer(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        self.send_network_quality().await?;

        loop {
            let deadline = Instant::now() + self.config.migration_timeout.max(Duration::from_secs(30));
            let frame = self.recv_cancellable(deadline, should_exit).await?;

            match PacketType::try_from(frame.packet_type) {
                Ok(PacketType::NetworkQuality) => {
                    let quality = NetworkQuality::decode(frame.payload)?;
                    self.peer_id = quality.participant_id;
                    self.peer_quality = Some(quality.quality);
                    self.transition(State::Negotiating);
                    return Ok(());
                }
                Ok(PacketType::Error) => return Err(self.protocol_error(frame)?),
                _ => continue,
            }
        }
    }

    async fn join_session(
        &mut self,
        session_string: &str,
        should_exit: &(impl Fn() -> bool + Sync),
    ) -> Result<(), DiscoveryError> {
        let timestamp = now_s();
        let signature = crypto::sign_session_join(
            &self.config.identity_secret,
            &self.config.identity_pubkey,
            timestamp,
            session_string,
        )
        .map_err(|_| DiscoveryError::Protocol(ErrorCode::Crypto, "failed to sign SESSION_JOIN".into()))?;

        let request = SessionJoin {
            identity: self.config.identity_pubkey,
            timestamp,
            signature,
            session_string: session_string.to_string(),
            password: self.config.password.clone(),
        };

        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);
        self.connection.send(PacketType::SessionJoin.into(), &buf).await?;

        let deadline = Instant::now() + self.config.connect_timeout;
        let frame = self.recv_cancellable(deadline, should_exit).await?;

        if frame.packet_type == u16::from(PacketType::Error) {
            return Err(self.protocol_error(frame)?);
        }

        self.expect(frame.packet_type, PacketType::SessionJoined)?;
        let joined = SessionJoined::decode(frame.payload)?;

        if !joined.success {
            return Err(DiscoveryError::Protocol(ErrorCode::Protocol, "join rejected".into()));
        }

        self.session_id = joined.session_id;
        self.session_string = session_string.to_string();
        self.participant_id = joined.participant_id;
        self.session_type = joined.session_type;
        self.is_host = false;

        if joined.server_port != 0 && !joined.server_address.is_empty() {
            self.host_address = joined.server_address;
            self.host_port = joined.server_port;
            self.transition(State::ConnectingHost);
        } else {
            self.transition(State::Negotiating);
        }

        Ok(())
    }

    async fn negotiate(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        if self.peer_quality.is_none() {
            self.send_network_quality().await?;

            let deadline = Instant::now() + self.config.connect_timeout;
            loop {
                let frame = self.recv_cancellable(deadline, should_exit).await?;

                match PacketType::try_from(frame.packet_type) {
                    Ok(PacketType::NetworkQuality) => {
                        let quality = NetworkQuality::decode(frame.payload)?;
                        self.peer_id = quality.participant_id;
                        self.peer_quality = Some(quality.quality);
                        break;
                    }
                    Ok(PacketType::Error) => return Err(self.protocol_error(frame)?),
                    _ => continue,
                }
            }
        }

        let own_quality = self.nat_probe.probe();
        let candidates = [
            Candidate { participant_id: self.participant_id, quality: own_quality },
            Candidate { participant_id: self.peer_id, quality: self.peer_quality.unwrap() },
        ];

        let winner = election::elect(&candidates).expect("two-candidate election never empty");

        if winner.participant_id == self.participant_id {
            self.is_host = true;
            self.transition(State::StartingHost);
        } else {
            self.is_host = false;
            self.transition(State::ConnectingHost);
        }

        Ok(())
    }

    async fn send_network_quality(&mut self) -> Result<(), DiscoveryError> {
        let quality = self.nat_probe.probe();
        let message = NetworkQuality {
            session_id: self.session_id,
            participant_id: self.participant_id,
            quality,
        };

        let mut buf = bytes::BytesMut::new();
        message.encode(&mut buf);
        self.connection.send(PacketType::NetworkQuality.into(), &buf).await?;
        Ok(())
    }

    async fn announce_as_host(&mut self, _should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let announcement = HostAnnouncement {
            session_id: self.session_id,
            host_id: self.participant_id,
            host_address: self.config.own_address.clone(),
            host_port: self.config.own_port,
            connection_type: self.session_type,
        };

        let mut buf = bytes::BytesMut::new();
        announcement.encode(&mut buf);
        self.connection.send(PacketType::HostAnnouncement.into(), &buf).await?;

        self.host_address = self.config.own_address.clone();
        self.host_port = self.config.own_port;
        self.handler.on_host_changed(self.participant_id, &self.host_address, self.host_port);
        Ok(())
    }

    /// Drives the WebRTC offer/answer/ICE exchange through the relay, with
    /// exponential backoff on a gathering timeout (`§4.8`).
    async fn negotiate_webrtc(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let mut attempt = 0u32;

        loop {
            match self.try_webrtc_exchange(should_exit).await {
                Ok(()) => return Ok(()),
                Err(DiscoveryError::Timeout) => {
                    attempt += 1;
                    if attempt > self.config.webrtc_reconnect_attempts {
                        return Err(DiscoveryError::WebrtcExhausted);
                    }

                    let backoff_ms = (1_000u64.saturating_mul(1 << attempt.min(5))).min(30_000);
                    let jitter_ms = rand::rng().random_range(0..1_000u64);
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_webrtc_exchange(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let offer = self.signaling.local_offer();
        let sdp = WebrtcSdp {
            session_id: self.session_id,
            sender_id: self.participant_id,
            recipient_id: self.peer_id,
            sdp_type: SdpType::Offer,
            sdp: offer,
        };

        let mut buf = bytes::BytesMut::new();
        sdp.encode(&mut buf);
        self.connection.send(PacketType::WebrtcSdp.into(), &buf).await?;

        let deadline = Instant::now() + self.config.ice_gather_timeout;

        loop {
            if self.signaling.gathering_complete() {
                return Ok(());
            }

            let frame = self.recv_cancellable(deadline, should_exit).await?;

            match PacketType::try_from(frame.packet_type) {
                Ok(PacketType::WebrtcSdp) => {
                    let reply = WebrtcSdp::decode(frame.payload)?;

                    if reply.sdp_type == SdpType::Offer {
                        let answer = WebrtcSdp {
                            session_id: self.session_id,
                            sender_id: self.participant_id,
                            recipient_id: self.peer_id,
                            sdp_type: SdpType::Answer,
                            sdp: self.signaling.local_answer(&reply.sdp),
                        };

                        let mut buf = bytes::BytesMut::new();
                        answer.encode(&mut buf);
                        self.connection.send(PacketType::WebrtcSdp.into(), &buf).await?;
                    }

                    if reply.sdp_type == SdpType::Answer {
                        for (candidate, mid) in self.signaling.local_candidates() {
                            let ice = codec::message::WebrtcIce {
                                session_id: self.session_id,
                                sender_id: self.participant_id,
                                recipient_id: self.peer_id,
                                candidate,
                                mid,
                            };

                            let mut buf = bytes::BytesMut::new();
                            ice.encode(&mut buf);
                            self.connection.send(PacketType::WebrtcIce.into(), &buf).await?;
                        }
                    }
                }
                Ok(PacketType::WebrtcIce) => {
                    let ice = codec::message::WebrtcIce::decode(frame.payload)?;
                    self.signaling.add_remote_candidate(&ice.candidate, &ice.mid);
                }
                Ok(PacketType::Error) => return Err(self.protocol_error(frame)?),
                _ => continue,
            }
        }
    }

    /// `ACTIVE`: pings the host on the liveness interval and watches for
    /// migration broadcasts, until the session ends or `should_exit` trips.
    async fn run_active(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let mut consecutive_failures = 0u32;
        let mut first_failure: Option<Instant> = None;
        let mut next_ping = Instant::now() + LIVENESS_INTERVAL;
        let mut next_future_host_round = Instant::now() + FUTURE_HOST_INTERVAL;

        loop {
            if should_exit() {
                self.transition(State::Ended);
                return Ok(());
            }

            let wake = next_ping.min(next_future_host_round);
            match self.recv_cancellable(wake, should_exit).await {
                Ok(frame) => self.handle_active_frame(frame)?,
                Err(DiscoveryError::Timeout) => {}
                Err(DiscoveryError::Cancelled) => {
                    self.transition(State::Ended);
                    return Ok(());
                }
                Err(error) => return Err(error),
            }

            if Instant::now() >= next_ping {
                next_ping = Instant::now() + LIVENESS_INTERVAL;

                if self.is_host {
                    continue;
                }

                if self.liveness_probe.ping_host() {
                    consecutive_failures = 0;
                    first_failure = None;
                } else {
                    consecutive_failures += 1;
                    let first = *first_failure.get_or_insert_with(Instant::now);

                    if consecutive_failures >= LIVENESS_FAILURE_LIMIT || first.elapsed() >= LIVENESS_TIMEOUT {
                        self.report_host_lost().await?;
                        return self.run_migration(should_exit).await;
                    }
                }
            }

            if self.is_host && Instant::now() >= next_future_host_round {
                next_future_host_round = Instant::now() + FUTURE_HOST_INTERVAL;
                self.broadcast_future_host().await?;
            }
        }
    }

    fn handle_active_frame(&mut self, frame: Frame) -> Result<(), DiscoveryError> {
        match PacketType::try_from(frame.packet_type) {
            Ok(PacketType::NetworkQuality) => {
                let quality = NetworkQuality::decode(frame.payload)?;
                if quality.participant_id == self.peer_id {
                    self.peer_quality = Some(quality.quality);
                }
            }
            Ok(PacketType::FutureHostElected) => {
                let elected = FutureHostElected::decode(frame.payload)?;
                self.is_future_host = elected.future_host_id == self.participant_id;
            }
            Ok(PacketType::HostAnnouncement) => {
                let announcement = HostAnnouncement::decode(frame.payload)?;
                self.host_address = announcement.host_address.clone();
                self.host_port = announcement.host_port;
                self.handler.on_host_changed(announcement.host_id, &announcement.host_address, announcement.host_port);
            }
            Ok(PacketType::HostLost) => {
                // Another participant's liveness prober tripped; our own
                // migration handling is driven independently.
            }
            Ok(PacketType::Error) => {
                let error = ErrorFrame::decode(frame.payload)?;
                self.handler.on_error(Some(error.code), &error.message);
            }
            _ => {}
        }

        Ok(())
    }

    async fn report_host_lost(&mut self) -> Result<(), DiscoveryError> {
        let lost = HostLost {
            session_id: self.session_id,
            participant_id: self.participant_id,
            last_host_id: self.peer_id,
            reason: HOST_LOST_REASON_LIVENESS,
            timestamp: now_s(),
        };

        let mut buf = bytes::BytesMut::new();
        lost.encode(&mut buf);
        self.connection.send(PacketType::HostLost.into(), &buf).await?;
        self.transition(State::Migrating);
        Ok(())
    }

    async fn broadcast_future_host(&mut self) -> Result<(), DiscoveryError> {
        let (future_host_id, address, port) = match self.peer_quality {
            Some(peer_quality) => {
                let candidates = [
                    Candidate { participant_id: self.participant_id, quality: self.nat_probe.probe() },
                    Candidate { participant_id: self.peer_id, quality: peer_quality },
                ];
                let winner = election::elect(&candidates).expect("two-candidate election never empty");

                if winner.participant_id == self.participant_id {
                    (self.participant_id, self.config.own_address.clone(), self.config.own_port)
                } else {
                    // The peer's reachable address is only known once it
                    // becomes host and announces itself; advertise it with
                    // an address the later HOST_ANNOUNCEMENT will correct.
                    (self.peer_id, String::new(), 0)
                }
            }
            None => (self.participant_id, self.config.own_address.clone(), self.config.own_port),
        };

        let elected = FutureHostElected {
            session_id: self.session_id,
            future_host_id,
            future_host_address: address,
            future_host_port: port,
            connection_type: self.session_type,
            round: now_s(),
        };

        let mut buf = bytes::BytesMut::new();
        elected.encode(&mut buf);
        self.connection.send(PacketType::FutureHostElected.into(), &buf).await?;
        Ok(())
    }

    async fn run_migration(&mut self, should_exit: &(impl Fn() -> bool + Sync)) -> Result<(), DiscoveryError> {
        let deadline = Instant::now() + self.config.migration_timeout;

        if self.is_future_host {
            self.transition(State::BecomeHost);
            self.is_host = true;
            self.announce_as_host(should_exit).await?;
            self.transition(State::Active);
            return self.run_active(should_exit).await;
        }

        loop {
            if Instant::now() >= deadline {
                self.transition(State::Failed);
                return Err(DiscoveryError::MigrationTimedOut);
            }

            let frame = match self.recv_cancellable(deadline, should_exit).await {
                Ok(frame) => frame,
                Err(DiscoveryError::Timeout) => continue,
                Err(error) => return Err(error),
            };

            if let Ok(PacketType::HostAnnouncement) = PacketType::try_from(frame.packet_type) {
                let announcement = HostAnnouncement::decode(frame.payload)?;
                self.peer_id = announcement.host_id;
                self.host_address = announcement.host_address.clone();
                self.host_port = announcement.host_port;
                self.handler.on_host_changed(announcement.host_id, &announcement.host_address, announcement.host_port);

                self.transition(State::Active);
                return self.run_active(should_exit).await;
            }
        }
    }

    fn expect(&self, actual: u16, expected: PacketType) -> Result<(), DiscoveryError> {
        if actual == u16::from(expected) {
            Ok(())
        } else {
            Err(DiscoveryError::UnexpectedPacket(actual))
        }
    }

    fn protocol_error(&self, frame: Frame) -> Result<DiscoveryError, DiscoveryError> {
        let error = ErrorFrame::decode(frame.payload)?;
        Ok(DiscoveryError::Protocol(error.code, error.message))
    }

    /// Waits for the next frame, polling `should_exit` and the deadline
    /// every 100 ms without restarting the underlying read.
    async fn recv_cancellable(
        &mut self,
        deadline: Instant,
        should_exit: &(impl Fn() -> bool + Sync),
    ) -> Result<Frame, DiscoveryError> {
        let recv_fut = self.connection.recv();
        tokio::pin!(recv_fut);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DiscoveryError::Timeout);
            }

            let slice = remaining.min(POLL_SLICE);

            tokio::select! {
                result = &mut recv_fut => return Ok(result?),
                _ = tokio::time::sleep(slice) => {
                    if should_exit() {
                        return Err(DiscoveryError::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(tier: u8, public: bool, up: u32, rtt: u32) -> NatQuality {
        NatQuality {
            has_public_ip: public,
            nat_type_tier: tier,
            upload_kbps: up,
            rtt_ms: rtt,
            detection_complete: true,
        }
    }

    #[test]
    fn election_prefers_public_ip() {
        let candidates = [
            Candidate { participant_id: [1u8; 16], quality: quality(2, false, 100, 30) },
            Candidate { participant_id: [2u8; 16], quality: quality(0, true, 50, 40) },
        ];

        let winner = election::elect(&candidates).unwrap();
        assert_eq!(winner.participant_id, [2u8; 16]);
    }

    #[test]
    fn discovery_config_defaults_to_direct_tcp() {
        let config = DiscoveryConfig::new("127.0.0.1:9000".parse().unwrap(), [0u8; 32], vec![]);
        assert_eq!(config.session_type, SessionType::DirectTcp);
        assert_eq!(config.max_participants, 2);
        assert!(!config.prefer_webrtc);
    }
}
