//! The TCP dispatcher: one listener per configured interface, one task per
//! connected client, a per-connection frame-read loop, and the packet-type
//! dispatch table that drives the registry, rate limiter, identity verifier
//! and relay held by a [`ServiceContext`].

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::{Bytes, BytesMut};
use codec::{
    Frame,
    message::{
        ErrorCode, ErrorFrame, FutureHostElected, HostAnnouncement, HostLost, NetworkQuality,
        PacketType, SessionCreate, SessionCreated, SessionInfo, SessionJoin, SessionJoined,
        SessionLeave, SessionType,
    },
};
use service::{
    ServiceContext, ServiceHandler,
    error::ServiceError,
    rate_limit::EventClass,
    session::{CreateRequest, FutureHost, JoinRequest},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedSender},
};

use crate::config::Interface;

/// Upper bound on a connection's unparsed read buffer, past which it is
/// treated as abusive and dropped — `§5`'s overflow guard.
const READ_BUFFER_LIMIT: usize = 3 * codec::MAX_PAYLOAD;

fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Where a connection sits in the lifecycle `§4.5` describes: `IDLE` until
/// `SESSION_CREATE`/`SESSION_JOIN` succeeds, then `JOINED` for the rest of
/// its life. There is no explicit `AUTHENTICATED` state — identity is
/// checked per-request, not latched on the connection.
enum ConnState {
    Idle,
    Joined { session_id: [u8; 16], participant_id: [u8; 16] },
}

/// Binds `interface.listen` and spawns the accept loop. Returns once the
/// listener is bound; connections are handled on spawned tasks.
pub async fn listener<T>(interface: Interface, ctx: Arc<ServiceContext<T>>) -> anyhow::Result<()>
where
    T: ServiceHandler + Clone + 'static,
{
    let listener = TcpListener::bind(interface.listen).await?;
    let local_addr = listener.local_addr()?;
    let idle_timeout = Duration::from_secs(interface.idle_timeout as u64);

    tokio::spawn(async move {
        while let Ok((socket, address)) = listener.accept().await {
            log::info!("tcp socket accept: addr={address:?}, interface={local_addr:?}");

            if let Err(error) = socket.set_nodelay(true) {
                log::error!("tcp socket set nodelay failed: addr={address}, err={error}");
            }

            let ctx = ctx.clone();
            tokio::spawn(async move {
                handle_connection(socket, address, ctx, idle_timeout).await;
                log::info!("tcp socket disconnect: addr={address:?}, interface={local_addr:?}");
            });
        }

        log::error!("tcp listener closed: interface={local_addr:?}");
    });

    log::info!("discovery service listening: listen={}", interface.listen);
    Ok(())
}

async fn handle_connection<T>(
    mut socket: TcpStream,
    address: SocketAddr,
    ctx: Arc<ServiceContext<T>>,
    idle_timeout: Duration,
) where
    T: ServiceHandler + Clone + 'static,
{
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Bytes>();
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut state = ConnState::Idle;
    let source_ip = address.ip();

    'outer: loop {
        let mut chunk = [0u8; 4096];

        tokio::select! {
            result = tokio::time::timeout(idle_timeout, socket.read(&mut chunk)) => {
                let size = match result {
                    Ok(Ok(size)) => size,
                    Ok(Err(error)) => {
                        log::warn!("tcp socket read failed: addr={address}, err={error}");
                        break 'outer;
                    }
                    Err(_) => {
                        log::info!("tcp socket idle timeout: addr={address}");
                        break 'outer;
                    }
                };

                if size == 0 {
                    break 'outer;
                }

                read_buf.extend_from_slice(&chunk[..size]);

                if read_buf.len() > READ_BUFFER_LIMIT {
                    log::warn!("tcp socket read buffer overflow: addr={address}");
                    break 'outer;
                }

                loop {
                    let frame = match Frame::decode(&mut read_buf) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(error) => {
                            log::warn!("tcp frame decode failed: addr={address}, err={error}");
                            break 'outer;
                        }
                    };

                    if socket
                        .write_all(&dispatch(&ctx, &mut state, &outbox_tx, source_ip, frame))
                        .await
                        .is_err()
                    {
                        break 'outer;
                    }
                }
            }
            Some(bytes) = outbox_rx.recv() => {
                if socket.write_all(&bytes).await.is_err() {
                    break 'outer;
                }
            }
        }
    }

    if let ConnState::Joined { session_id, participant_id } = state {
        ctx.relay.remove(session_id, participant_id);
        if ctx.registry.leave(&session_id, &participant_id).is_ok() {
            ctx.handler.on_session_left(&session_id, &participant_id);
        }
    }
}

/// Decodes and handles one frame, returning the bytes to write back to this
/// same connection (an empty frame-less buffer for packet types whose only
/// effect is a relay forward to other connections).
fn dispatch<T>(
    ctx: &Arc<ServiceContext<T>>,
    state: &mut ConnState,
    outbox_tx: &UnboundedSender<Bytes>,
    source_ip: std::net::IpAddr,
    frame: Frame,
) -> BytesMut
where
    T: ServiceHandler + Clone + 'static,
{
    let packet_type = match PacketType::try_from(frame.packet_type) {
        Ok(packet_type) => packet_type,
        Err(_) => return error_reply(ErrorCode::UnknownPacket, "unknown packet type"),
    };

    let result = match packet_type {
        PacketType::SessionCreate => handle_session_create(ctx, state, outbox_tx, source_ip, frame.payload),
        PacketType::SessionLookup => handle_session_lookup(ctx, source_ip, frame.payload),
        PacketType::SessionJoin => handle_session_join(ctx, state, outbox_tx, source_ip, frame.payload),
        PacketType::SessionLeave => handle_session_leave(ctx, state, frame.payload),
        PacketType::WebrtcSdp => relay_targeted(ctx, state, PacketType::WebrtcSdp, frame.payload),
        PacketType::WebrtcIce => relay_targeted(ctx, state, PacketType::WebrtcIce, frame.payload),
        PacketType::NetworkQuality => relay_broadcast_network_quality(ctx, state, frame.payload),
        PacketType::HostLost => handle_host_lost(ctx, state, frame.payload),
        PacketType::HostAnnouncement => handle_host_announcement(ctx, state, frame.payload),
        PacketType::FutureHostElected => handle_future_host_elected(ctx, state, frame.payload),
        PacketType::DiscoveryPing => return Frame::encode(PacketType::DiscoveryPong.into(), &[]),
        _ => Err(ServiceError::UnknownPacket),
    };

    match result {
        Ok(reply) => reply,
        Err(error) => {
            if error == ServiceError::RateLimited {
                ctx.handler.on_rate_limited(&source_ip.to_string(), "?");
            }
            error_reply(error.code(), error.message())
        }
    }
}

fn error_reply(code: ErrorCode, message: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    ErrorFrame::new(code, message).encode(&mut buf);
    Frame::encode(PacketType::Error.into(), &buf)
}

fn check_rate_limit<T>(ctx: &Arc<ServiceContext<T>>, ip: std::net::IpAddr, class: EventClass) -> Result<(), ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let ip = ip.to_string();
    if ctx.rate_limiter.check(&ip, class) {
        Ok(())
    } else {
        ctx.handler.on_rate_limited(&ip, class.as_str());
        Err(ServiceError::RateLimited)
    }
}

/// Textual equality of the claimed address against the TCP source IP,
/// normalizing an IPv4-mapped IPv6 source down to its IPv4 form first
/// (invariant 4).
fn addresses_match(claimed: &str, source: std::net::IpAddr) -> bool {
    let normalized = match source {
        std::net::IpAddr::V6(v6) => v6.to_ipv4_mapped().map(std::net::IpAddr::V4).unwrap_or(source),
        other => other,
    };

    claimed == normalized.to_string()
}

fn handle_session_create<T>(
    ctx: &Arc<ServiceContext<T>>,
    state: &mut ConnState,
    outbox_tx: &UnboundedSender<Bytes>,
    source_ip: std::net::IpAddr,
    payload: Bytes,
) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    check_rate_limit(ctx, source_ip, EventClass::SessionCreate)?;

    let request = SessionCreate::decode(payload).map_err(|_| ServiceError::InvalidParam)?;

    ctx.identity
        .verify_session_create(&request.identity, request.timestamp, request.capabilities, request.max_participants, &request.signature, now_s())?;

    if request.session_type == SessionType::DirectTcp && !addresses_match(&request.server_address, source_ip) {
        return Err(ServiceError::InvalidParam);
    }

    let session = ctx.registry.create(CreateRequest {
        reserved_string: request.reserved_string,
        host_pubkey: request.identity,
        capabilities: request.capabilities,
        max_participants: request.max_participants,
        password_hash: request.password_hash,
        expose_ip_publicly: request.expose_ip_publicly,
        session_type: request.session_type,
        server_address: request.server_address,
        server_port: request.server_port,
    })?;

    ctx.handler.on_session_created(&session.session_id, &session.session_string);
    ctx.handler.on_session_joined(&session.session_id, &session.host_participant_id, session.current_participants());

    ctx.relay.register(session.session_id, session.host_participant_id, outbox_tx.clone());
    *state = ConnState::Joined {
        session_id: session.session_id,
        participant_id: session.host_participant_id,
    };

    let reply = SessionCreated {
        session_id: session.session_id,
        participant_id: session.host_participant_id,
        session_string: session.session_string,
        expires_at_ms: session.expires_at_ms,
        stun_count: ctx.stun_count,
        turn_count: ctx.turn_count,
    };

    let mut buf = BytesMut::new();
    reply.encode(&mut buf);
    Ok(Frame::encode(PacketType::SessionCreated.into(), &buf))
}

fn handle_session_lookup<T>(
    ctx: &Arc<ServiceContext<T>>,
    source_ip: std::net::IpAddr,
    payload: Bytes,
) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    check_rate_limit(ctx, source_ip, EventClass::SessionLookup)?;

    let request = codec::message::SessionLookup::decode(payload).map_err(|_| ServiceError::InvalidParam)?;
    let info = match ctx.registry.lookup(&request.session_string) {
        Some(session) => SessionInfo {
            found: true,
            has_password: session.has_password(),
            session_type: session.session_type,
            current_participants: session.current_participants(),
            max_participants: session.max_participants,
        },
        None => SessionInfo {
            found: false,
            has_password: false,
            session_type: SessionType::DirectTcp,
            current_participants: 0,
            max_participants: 0,
        },
    };

    let mut buf = BytesMut::new();
    info.encode(&mut buf);
    Ok(Frame::encode(PacketType::SessionInfo.into(), &buf))
}

fn handle_session_join<T>(
    ctx: &Arc<ServiceContext<T>>,
    state: &mut ConnState,
    outbox_tx: &UnboundedSender<Bytes>,
    source_ip: std::net::IpAddr,
    payload: Bytes,
) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    if let ConnState::Joined { .. } = state {
        return Err(ServiceError::Protocol);
    }

    check_rate_limit(ctx, source_ip, EventClass::SessionJoin)?;

    let request = SessionJoin::decode(payload).map_err(|_| ServiceError::InvalidParam)?;

    ctx.identity
        .verify_session_join(&request.identity, request.timestamp, &request.session_string, &request.signature, now_s())?;

    let (session, participant_id) = ctx.registry.join(JoinRequest {
        session_string: request.session_string,
        identity_pubkey: request.identity,
        password: request.password,
    })?;

    ctx.handler.on_session_joined(&session.session_id, &participant_id, session.current_participants());
    ctx.relay.register(session.session_id, participant_id, outbox_tx.clone());
    *state = ConnState::Joined { session_id: session.session_id, participant_id };

    let disclose = session.has_password() || session.expose_ip_publicly;
    let (turn_username, turn_password) = if session.session_type == SessionType::WebRtc {
        let expires_at_s = now_s() + ctx.turn_credential_ttl_s;
        match codec::crypto::turn_credential(&ctx.turn_secret, &session.session_string, expires_at_s) {
            Ok((username, password)) => (Some(username), Some(password)),
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    let reply = SessionJoined {
        success: true,
        participant_id,
        session_id: session.session_id,
        session_type: session.session_type,
        server_address: if disclose { session.server_address } else { String::new() },
        server_port: if disclose { session.server_port } else { 0 },
        turn_username,
        turn_password,
    };

    let mut buf = BytesMut::new();
    reply.encode(&mut buf);
    Ok(Frame::encode(PacketType::SessionJoined.into(), &buf))
}

fn handle_session_leave<T>(ctx: &Arc<ServiceContext<T>>, state: &mut ConnState, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let ConnState::Joined { session_id, participant_id } = state else {
        return Err(ServiceError::Protocol);
    };

    let request = SessionLeave::decode(payload).map_err(|_| ServiceError::InvalidParam)?;
    if request.session_id != *session_id || request.participant_id != *participant_id {
        return Err(ServiceError::Protocol);
    }

    ctx.registry.leave(session_id, participant_id)?;
    ctx.relay.remove(*session_id, *participant_id);
    ctx.handler.on_session_left(session_id, participant_id);
    *state = ConnState::Idle;

    Ok(BytesMut::new())
}

fn joined_session_id(state: &ConnState) -> Result<[u8; 16], ServiceError> {
    match state {
        ConnState::Joined { session_id, .. } => Ok(*session_id),
        ConnState::Idle => Err(ServiceError::Protocol),
    }
}

/// `WEBRTC_SDP`/`WEBRTC_ICE`: forwarded verbatim to the named recipient.
/// The relay never needs the decoded payload, only the addressing fields
/// every relayed message shares at a fixed offset.
fn relay_targeted<T>(ctx: &Arc<ServiceContext<T>>, state: &ConnState, packet_type: PacketType, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let session_id = joined_session_id(state)?;

    if payload.len() < 48 {
        return Err(ServiceError::InvalidParam);
    }

    let sender_id: [u8; 16] = payload[16..32].try_into().unwrap();
    let recipient_id: [u8; 16] = payload[32..48].try_into().unwrap();

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&payload);
    let frame = Frame::encode(packet_type.into(), &buf);

    ctx.relay.forward(session_id, sender_id, recipient_id, frame.freeze())?;
    Ok(BytesMut::new())
}

/// `NETWORK_QUALITY` always broadcasts to the rest of the session.
fn relay_broadcast_network_quality<T>(ctx: &Arc<ServiceContext<T>>, state: &ConnState, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let session_id = joined_session_id(state)?;
    let quality = NetworkQuality::decode(payload.clone()).map_err(|_| ServiceError::InvalidParam)?;

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&payload);
    let frame = Frame::encode(PacketType::NetworkQuality.into(), &buf);

    ctx.relay.forward(session_id, quality.participant_id, [0u8; 16], frame.freeze())?;
    Ok(BytesMut::new())
}

/// `HOST_LOST`: administratively marks the session as migrating, then
/// broadcasts the notification so the rest of the session can start
/// watching for a `HOST_ANNOUNCEMENT`.
fn handle_host_lost<T>(ctx: &Arc<ServiceContext<T>>, state: &ConnState, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let session_id = joined_session_id(state)?;
    let lost = HostLost::decode(payload.clone()).map_err(|_| ServiceError::InvalidParam)?;

    ctx.registry.start_migration(&session_id)?;

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&payload);
    let frame = Frame::encode(PacketType::HostLost.into(), &buf);

    ctx.relay.forward(session_id, lost.participant_id, [0u8; 16], frame.freeze())?;
    Ok(BytesMut::new())
}

/// `HOST_ANNOUNCEMENT`: the new host's address becomes authoritative, then
/// every other participant is told.
fn handle_host_announcement<T>(ctx: &Arc<ServiceContext<T>>, state: &ConnState, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let session_id = joined_session_id(state)?;
    let announcement = HostAnnouncement::decode(payload.clone()).map_err(|_| ServiceError::InvalidParam)?;

    ctx.registry.update_host(
        &session_id,
        announcement.host_id,
        announcement.host_address.clone(),
        announcement.host_port,
        announcement.connection_type,
    )?;
    ctx.handler.on_host_announced(&session_id, &announcement.host_id);

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&payload);
    let frame = Frame::encode(PacketType::HostAnnouncement.into(), &buf);

    ctx.relay.forward(session_id, announcement.host_id, [0u8; 16], frame.freeze())?;
    Ok(BytesMut::new())
}

/// `FUTURE_HOST_ELECTED`: recorded for `is_migration_ready`'s caller and
/// rebroadcast so every participant can watch for the same successor.
fn handle_future_host_elected<T>(ctx: &Arc<ServiceContext<T>>, state: &ConnState, payload: Bytes) -> Result<BytesMut, ServiceError>
where
    T: ServiceHandler + Clone + 'static,
{
    let session_id = joined_session_id(state)?;
    let elected = FutureHostElected::decode(payload.clone()).map_err(|_| ServiceError::InvalidParam)?;

    ctx.registry.set_future_host(
        &session_id,
        FutureHost {
            elected_round: elected.round,
            future_host_id: elected.future_host_id,
            future_host_addr: elected.future_host_address.clone(),
            future_host_port: elected.future_host_port,
            future_host_connection_type: elected.connection_type,
        },
    )?;

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&payload);
    let frame = Frame::encode(PacketType::FutureHostElected.into(), &buf);

    ctx.relay.forward(session_id, elected.future_host_id, [0u8; 16], frame.freeze())?;
    Ok(BytesMut::new())
}
