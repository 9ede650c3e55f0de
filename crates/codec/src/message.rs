//! Packet type codes and payload layouts carried inside a [`crate::Frame`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, get_array16, get_array32, get_array64, get_str8, get_str16, put_str8, put_str16};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum PacketType {
    SessionCreate = 0x0001,
    SessionCreated = 0x0002,
    SessionLookup = 0x0003,
    SessionInfo = 0x0004,
    SessionJoin = 0x0005,
    SessionJoined = 0x0006,
    SessionLeave = 0x0007,
    WebrtcSdp = 0x0008,
    WebrtcIce = 0x0009,
    NetworkQuality = 0x000a,
    HostLost = 0x000b,
    HostAnnouncement = 0x000c,
    FutureHostElected = 0x000d,
    DiscoveryPing = 0x000e,
    DiscoveryPong = 0x000f,
    Error = 0x00ff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SessionType {
    DirectTcp = 0,
    WebRtc = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SdpType {
    Offer = 0,
    Answer = 1,
}

/// Wire-level error codes, `§7` of the protocol contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidParam = 1,
    Protocol = 2,
    Crypto = 3,
    NotFound = 4,
    AlreadyExists = 5,
    Full = 6,
    WrongPassword = 7,
    PasswordRequired = 8,
    RateLimited = 9,
    OutOfMemory = 10,
    Internal = 11,
    UnknownPacket = 12,
    ConnectTimeout = 13,
}

/// `SESSION_CREATE` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCreate {
    pub identity: [u8; 32],
    pub timestamp: u64,
    pub signature: [u8; 64],
    pub capabilities: u32,
    pub max_participants: u8,
    pub session_type: SessionType,
    pub password_hash: Option<String>,
    pub server_address: String,
    pub server_port: u16,
    pub expose_ip_publicly: bool,
    pub reserved_string: Option<String>,
}

impl SessionCreate {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.identity);
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.signature);
        buf.put_u32(self.capabilities);
        buf.put_u8(self.max_participants);
        buf.put_u8(self.session_type.into());
        buf.put_u8(self.password_hash.is_some() as u8);
        if let Some(hash) = &self.password_hash {
            put_str8(buf, hash);
        }
        put_str8(buf, &self.server_address);
        buf.put_u16(self.server_port);
        buf.put_u8(self.expose_ip_publicly as u8);
        buf.put_u8(self.reserved_string.is_some() as u8);
        if let Some(s) = &self.reserved_string {
            put_str8(buf, s);
        }
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let identity = get_array32(&mut buf)?;
        if buf.remaining() < 8 {
            return Err(Error::InvalidInput);
        }
        let timestamp = buf.get_u64();
        let signature = get_array64(&mut buf)?;

        if buf.remaining() < 4 + 1 + 1 + 1 {
            return Err(Error::InvalidInput);
        }
        let capabilities = buf.get_u32();
        let max_participants = buf.get_u8();
        let session_type = SessionType::try_from(buf.get_u8())
            .map_err(|_| Error::InvalidInput)?;

        let has_password = buf.get_u8() != 0;
        let password_hash = if has_password {
            Some(get_str8(&mut buf)?)
        } else {
            None
        };

        let server_address = get_str8(&mut buf)?;
        if buf.remaining() < 2 + 1 {
            return Err(Error::InvalidInput);
        }
        let server_port = buf.get_u16();
        let expose_ip_publicly = buf.get_u8() != 0;

        if buf.remaining() < 1 {
            return Err(Error::InvalidInput);
        }
        let has_reserved = buf.get_u8() != 0;
        let reserved_string = if has_reserved {
            Some(get_str8(&mut buf)?)
        } else {
            None
        };

        Ok(Self {
            identity,
            timestamp,
            signature,
            capabilities,
            max_participants,
            session_type,
            password_hash,
            server_address,
            server_port,
            expose_ip_publicly,
            reserved_string,
        })
    }
}

/// `SESSION_CREATED` reply. `participant_id` is the slot the server allocates
/// for the creator itself — the host is a participant like any other, so the
/// creator never has to infer its own id client-side.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCreated {
    pub session_id: [u8; 16],
    pub participant_id: [u8; 16],
    pub session_string: String,
    pub expires_at_ms: u64,
    pub stun_count: u16,
    pub turn_count: u16,
}

impl SessionCreated {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.participant_id);
        put_str8(buf, &self.session_string);
        buf.put_u64(self.expires_at_ms);
        buf.put_u16(self.stun_count);
        buf.put_u16(self.turn_count);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let participant_id = get_array16(&mut buf)?;
        let session_string = get_str8(&mut buf)?;
        if buf.remaining() < 8 + 2 + 2 {
            return Err(Error::InvalidInput);
        }
        Ok(Self {
            session_id,
            participant_id,
            session_string,
            expires_at_ms: buf.get_u64(),
            stun_count: buf.get_u16(),
            turn_count: buf.get_u16(),
        })
    }
}

/// `SESSION_LOOKUP` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLookup {
    pub session_string: String,
}

impl SessionLookup {
    pub fn encode(&self, buf: &mut BytesMut) {
        put_str8(buf, &self.session_string);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        Ok(Self {
            session_string: get_str8(&mut buf)?,
        })
    }
}

/// `SESSION_INFO` reply. Never discloses host address/port (invariant 5).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub found: bool,
    pub has_password: bool,
    pub session_type: SessionType,
    pub current_participants: u8,
    pub max_participants: u8,
}

impl SessionInfo {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.found as u8);
        buf.put_u8(self.has_password as u8);
        buf.put_u8(self.session_type.into());
        buf.put_u8(self.current_participants);
        buf.put_u8(self.max_participants);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 5 {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            found: buf.get_u8() != 0,
            has_password: buf.get_u8() != 0,
            session_type: SessionType::try_from(buf.get_u8()).map_err(|_| Error::InvalidInput)?,
            current_participants: buf.get_u8(),
            max_participants: buf.get_u8(),
        })
    }
}

/// `SESSION_JOIN` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionJoin {
    pub identity: [u8; 32],
    pub timestamp: u64,
    pub signature: [u8; 64],
    pub session_string: String,
    pub password: Option<String>,
}

impl SessionJoin {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.identity);
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.signature);
        put_str8(buf, &self.session_string);
        buf.put_u8(self.password.is_some() as u8);
        if let Some(p) = &self.password {
            put_str8(buf, p);
        }
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let identity = get_array32(&mut buf)?;
        if buf.remaining() < 8 {
            return Err(Error::InvalidInput);
        }
        let timestamp = buf.get_u64();
        let signature = get_array64(&mut buf)?;
        let session_string = get_str8(&mut buf)?;

        if buf.remaining() < 1 {
            return Err(Error::InvalidInput);
        }
        let has_password = buf.get_u8() != 0;
        let password = if has_password {
            Some(get_str8(&mut buf)?)
        } else {
            None
        };

        Ok(Self {
            identity,
            timestamp,
            signature,
            session_string,
            password,
        })
    }
}

/// `SESSION_JOINED` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionJoined {
    pub success: bool,
    pub participant_id: [u8; 16],
    pub session_id: [u8; 16],
    pub session_type: SessionType,
    pub server_address: String,
    pub server_port: u16,
    pub turn_username: Option<String>,
    pub turn_password: Option<String>,
}

impl SessionJoined {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.success as u8);
        buf.put_slice(&self.participant_id);
        buf.put_slice(&self.session_id);
        buf.put_u8(self.session_type.into());
        put_str8(buf, &self.server_address);
        buf.put_u16(self.server_port);

        let has_turn = self.turn_username.is_some();
        buf.put_u8(has_turn as u8);
        if has_turn {
            put_str8(buf, self.turn_username.as_deref().unwrap_or_default());
            put_str8(buf, self.turn_password.as_deref().unwrap_or_default());
        }
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 1 {
            return Err(Error::InvalidInput);
        }
        let success = buf.get_u8() != 0;
        let participant_id = get_array16(&mut buf)?;
        let session_id = get_array16(&mut buf)?;

        if buf.remaining() < 1 {
            return Err(Error::InvalidInput);
        }
        let session_type = SessionType::try_from(buf.get_u8()).map_err(|_| Error::InvalidInput)?;
        let server_address = get_str8(&mut buf)?;

        if buf.remaining() < 3 {
            return Err(Error::InvalidInput);
        }
        let server_port = buf.get_u16();
        let has_turn = buf.get_u8() != 0;

        let (turn_username, turn_password) = if has_turn {
            (Some(get_str8(&mut buf)?), Some(get_str8(&mut buf)?))
        } else {
            (None, None)
        };

        Ok(Self {
            success,
            participant_id,
            session_id,
            session_type,
            server_address,
            server_port,
            turn_username,
            turn_password,
        })
    }
}

/// `SESSION_LEAVE` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLeave {
    pub session_id: [u8; 16],
    pub participant_id: [u8; 16],
}

impl SessionLeave {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.participant_id);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        Ok(Self {
            session_id: get_array16(&mut buf)?,
            participant_id: get_array16(&mut buf)?,
        })
    }
}

/// `WEBRTC_SDP` relay payload. Forwarded verbatim; the relay never parses
/// `sdp`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebrtcSdp {
    pub session_id: [u8; 16],
    pub sender_id: [u8; 16],
    pub recipient_id: [u8; 16],
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl WebrtcSdp {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.sender_id);
        buf.put_slice(&self.recipient_id);
        buf.put_u8(self.sdp_type.into());
        put_str16(buf, &self.sdp);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let sender_id = get_array16(&mut buf)?;
        let recipient_id = get_array16(&mut buf)?;

        if buf.remaining() < 1 {
            return Err(Error::InvalidInput);
        }
        let sdp_type = SdpType::try_from(buf.get_u8()).map_err(|_| Error::InvalidInput)?;
        let sdp = get_str16(&mut buf)?;

        Ok(Self {
            session_id,
            sender_id,
            recipient_id,
            sdp_type,
            sdp,
        })
    }
}

/// `WEBRTC_ICE` relay payload. Forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct WebrtcIce {
    pub session_id: [u8; 16],
    pub sender_id: [u8; 16],
    pub recipient_id: [u8; 16],
    pub candidate: String,
    pub mid: String,
}

impl WebrtcIce {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.sender_id);
        buf.put_slice(&self.recipient_id);
        put_str16(buf, &self.candidate);
        put_str8(buf, &self.mid);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let sender_id = get_array16(&mut buf)?;
        let recipient_id = get_array16(&mut buf)?;
        let candidate = get_str16(&mut buf)?;
        let mid = get_str8(&mut buf)?;

        Ok(Self {
            session_id,
            sender_id,
            recipient_id,
            candidate,
            mid,
        })
    }
}

/// NAT-quality descriptor carried by `NETWORK_QUALITY`, and the raw input to
/// host election.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NatQuality {
    pub has_public_ip: bool,
    pub nat_type_tier: u8,
    pub upload_kbps: u32,
    pub rtt_ms: u32,
    pub detection_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkQuality {
    pub session_id: [u8; 16],
    pub participant_id: [u8; 16],
    pub quality: NatQuality,
}

impl NetworkQuality {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.participant_id);
        buf.put_u8(self.quality.has_public_ip as u8);
        buf.put_u8(self.quality.nat_type_tier);
        buf.put_u32(self.quality.upload_kbps);
        buf.put_u32(self.quality.rtt_ms);
        buf.put_u8(self.quality.detection_complete as u8);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let participant_id = get_array16(&mut buf)?;

        if buf.remaining() < 1 + 1 + 4 + 4 + 1 {
            return Err(Error::InvalidInput);
        }

        let quality = NatQuality {
            has_public_ip: buf.get_u8() != 0,
            nat_type_tier: buf.get_u8(),
            upload_kbps: buf.get_u32(),
            rtt_ms: buf.get_u32(),
            detection_complete: buf.get_u8() != 0,
        };

        Ok(Self {
            session_id,
            participant_id,
            quality,
        })
    }
}

/// `HOST_LOST` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct HostLost {
    pub session_id: [u8; 16],
    pub participant_id: [u8; 16],
    pub last_host_id: [u8; 16],
    pub reason: u8,
    pub timestamp: u64,
}

impl HostLost {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.participant_id);
        buf.put_slice(&self.last_host_id);
        buf.put_u8(self.reason);
        buf.put_u64(self.timestamp);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let participant_id = get_array16(&mut buf)?;
        let last_host_id = get_array16(&mut buf)?;

        if buf.remaining() < 1 + 8 {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            session_id,
            participant_id,
            last_host_id,
            reason: buf.get_u8(),
            timestamp: buf.get_u64(),
        })
    }
}

/// `HOST_ANNOUNCEMENT` — the new host advertises its reachable address.
#[derive(Debug, Clone, PartialEq)]
pub struct HostAnnouncement {
    pub session_id: [u8; 16],
    pub host_id: [u8; 16],
    pub host_address: String,
    pub host_port: u16,
    pub connection_type: SessionType,
}

impl HostAnnouncement {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.host_id);
        put_str8(buf, &self.host_address);
        buf.put_u16(self.host_port);
        buf.put_u8(self.connection_type.into());
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let host_id = get_array16(&mut buf)?;
        let host_address = get_str8(&mut buf)?;

        if buf.remaining() < 2 + 1 {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            session_id,
            host_id,
            host_port: buf.get_u16(),
            connection_type: SessionType::try_from(buf.get_u8()).map_err(|_| Error::InvalidInput)?,
            host_address,
        })
    }
}

/// `FUTURE_HOST_ELECTED` — periodic pre-election broadcast from the current
/// host.
#[derive(Debug, Clone, PartialEq)]
pub struct FutureHostElected {
    pub session_id: [u8; 16],
    pub future_host_id: [u8; 16],
    pub future_host_address: String,
    pub future_host_port: u16,
    pub connection_type: SessionType,
    pub round: u64,
}

impl FutureHostElected {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.session_id);
        buf.put_slice(&self.future_host_id);
        put_str8(buf, &self.future_host_address);
        buf.put_u16(self.future_host_port);
        buf.put_u8(self.connection_type.into());
        buf.put_u64(self.round);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let session_id = get_array16(&mut buf)?;
        let future_host_id = get_array16(&mut buf)?;
        let future_host_address = get_str8(&mut buf)?;

        if buf.remaining() < 2 + 1 + 8 {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            session_id,
            future_host_id,
            future_host_port: buf.get_u16(),
            connection_type: SessionType::try_from(buf.get_u8()).map_err(|_| Error::InvalidInput)?,
            round: buf.get_u64(),
            future_host_address,
        })
    }
}

/// `ERROR` frame: a short code and an operator-safe message.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.code.into());
        put_str8(buf, &self.message);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(Error::InvalidInput);
        }

        let code = ErrorCode::try_from(buf.get_u16()).map_err(|_| Error::InvalidInput)?;
        let message = get_str8(&mut buf)?;

        Ok(Self { code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_create_round_trips() {
        let msg = SessionCreate {
            identity: [9u8; 32],
            timestamp: 1_700_000_000,
            signature: [7u8; 64],
            capabilities: 0x03,
            max_participants: 8,
            session_type: SessionType::DirectTcp,
            password_hash: Some("argon2id$hash".into()),
            server_address: "203.0.113.1".into(),
            server_port: 27224,
            expose_ip_publicly: true,
            reserved_string: Some("ALFA-BRAVO".into()),
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionCreate::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_create_round_trips_without_password_or_reservation() {
        let msg = SessionCreate {
            identity: [1u8; 32],
            timestamp: 1,
            signature: [2u8; 64],
            capabilities: 0,
            max_participants: 4,
            session_type: SessionType::WebRtc,
            password_hash: None,
            server_address: "".into(),
            server_port: 0,
            expose_ip_publicly: false,
            reserved_string: None,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionCreate::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_created_round_trips() {
        let msg = SessionCreated {
            session_id: [1u8; 16],
            participant_id: [2u8; 16],
            session_string: "ALFA-BRAVO".into(),
            expires_at_ms: 1_700_000_000_000,
            stun_count: 2,
            turn_count: 1,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionCreated::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_lookup_round_trips() {
        let msg = SessionLookup { session_string: "HIDDEN".into() };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionLookup::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_info_round_trips() {
        let msg = SessionInfo {
            found: true,
            has_password: false,
            session_type: SessionType::WebRtc,
            current_participants: 2,
            max_participants: 8,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionInfo::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_join_round_trips() {
        let msg = SessionJoin {
            identity: [3u8; 32],
            timestamp: 42,
            signature: [4u8; 64],
            session_string: "GATED".into(),
            password: Some("correct-horse".into()),
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionJoin::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_joined_round_trips_with_turn_credentials() {
        let msg = SessionJoined {
            success: true,
            participant_id: [5u8; 16],
            session_id: [6u8; 16],
            session_type: SessionType::WebRtc,
            server_address: "203.0.113.9".into(),
            server_port: 4000,
            turn_username: Some("1700000000:participant".into()),
            turn_password: Some("base64mac".into()),
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionJoined::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_joined_round_trips_without_turn_credentials() {
        let msg = SessionJoined {
            success: false,
            participant_id: [0u8; 16],
            session_id: [0u8; 16],
            session_type: SessionType::DirectTcp,
            server_address: "".into(),
            server_port: 0,
            turn_username: None,
            turn_password: None,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionJoined::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn session_leave_round_trips() {
        let msg = SessionLeave { session_id: [1u8; 16], participant_id: [2u8; 16] };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = SessionLeave::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn webrtc_sdp_round_trips() {
        let msg = WebrtcSdp {
            session_id: [1u8; 16],
            sender_id: [2u8; 16],
            recipient_id: [3u8; 16],
            sdp_type: SdpType::Offer,
            sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".into(),
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = WebrtcSdp::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn webrtc_ice_round_trips() {
        let msg = WebrtcIce {
            session_id: [1u8; 16],
            sender_id: [2u8; 16],
            recipient_id: [3u8; 16],
            candidate: "candidate:1 1 UDP 2122260223 10.0.0.1 54321 typ host".into(),
            mid: "0".into(),
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = WebrtcIce::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn network_quality_round_trips() {
        let msg = NetworkQuality {
            session_id: [1u8; 16],
            participant_id: [2u8; 16],
            quality: NatQuality {
                has_public_ip: true,
                nat_type_tier: 0,
                upload_kbps: 800,
                rtt_ms: 50,
                detection_complete: true,
            },
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = NetworkQuality::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn host_lost_round_trips() {
        let msg = HostLost {
            session_id: [1u8; 16],
            participant_id: [2u8; 16],
            last_host_id: [3u8; 16],
            reason: 1,
            timestamp: 1_700_000_000,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = HostLost::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn host_announcement_round_trips() {
        let msg = HostAnnouncement {
            session_id: [1u8; 16],
            host_id: [2u8; 16],
            host_address: "203.0.113.5".into(),
            host_port: 9000,
            connection_type: SessionType::DirectTcp,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = HostAnnouncement::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn future_host_elected_round_trips() {
        let msg = FutureHostElected {
            session_id: [1u8; 16],
            future_host_id: [2u8; 16],
            future_host_address: "203.0.113.6".into(),
            future_host_port: 9001,
            connection_type: SessionType::WebRtc,
            round: 3,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = FutureHostElected::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn error_frame_round_trips() {
        let msg = ErrorFrame::new(ErrorCode::WrongPassword, "bad password");
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = ErrorFrame::decode(buf.freeze()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let msg = SessionJoin {
            identity: [1u8; 32],
            timestamp: 1,
            signature: [2u8; 64],
            session_string: "X".into(),
            password: None,
        };

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(SessionJoin::decode(buf.freeze()).is_err());
    }
}
