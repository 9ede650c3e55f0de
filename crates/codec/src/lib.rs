//! Wire framing and payload codecs for the discovery and signaling protocol.
//!
//! A frame on the wire is `| u16 type | u32 payload_len | u32 crc32(payload) | payload |`,
//! all integers big-endian. `payload_len` is bounded by [`MAX_PAYLOAD`]; frames
//! that claim a larger length are rejected before any payload bytes are read.

pub mod crypto;
pub mod election;
pub mod message;

use std::{array::TryFromSliceError, str::Utf8Error};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on a single frame's payload, in bytes.
pub const MAX_PAYLOAD: usize = 1 << 20;

const HEADER_LEN: usize = 2 + 4 + 4;

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    PayloadTooLarge,
    ChecksumMismatch,
    UnknownPacketType(u16),
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

/// A decoded frame: the raw packet type and its still-undecoded payload.
///
/// Splitting framing from payload decoding lets the dispatcher match on
/// `packet_type` before committing to a payload struct.
pub struct Frame {
    pub packet_type: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Encodes a frame from a packet type and an already-serialized payload.
    ///
    /// # Test
    ///
    /// ```
    /// use dss_codec::Frame;
    ///
    /// let encoded = Frame::encode(0x0001, b"hello");
    /// let mut buf = encoded;
    /// let frame = Frame::decode(&mut buf).unwrap().unwrap();
    ///
    /// assert_eq!(frame.packet_type, 0x0001);
    /// assert_eq!(&frame.payload[..], b"hello");
    /// ```
    pub fn encode(packet_type: u16, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u16(packet_type);
        buf.put_u32(payload.len() as u32);
        buf.put_u32(crc32fast::hash(payload));
        buf.put_slice(payload);
        buf
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame —
    /// the caller should read more bytes from the socket and retry. On a
    /// complete frame the consumed bytes are advanced out of `buf`.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let packet_type = u16::from_be_bytes(buf[0..2].try_into()?);
        let payload_len = u32::from_be_bytes(buf[2..6].try_into()?) as usize;
        let crc = u32::from_be_bytes(buf[6..10].try_into()?);

        if payload_len > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }

        if buf.len() < HEADER_LEN + payload_len {
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let payload = buf.split_to(payload_len).freeze();

        if crc32fast::hash(&payload) != crc {
            return Err(Error::ChecksumMismatch);
        }

        Ok(Some(Self { packet_type, payload }))
    }
}

/// Reads a `u8`-length-prefixed UTF-8 string.
pub(crate) fn get_str8(buf: &mut Bytes) -> Result<String, Error> {
    if buf.remaining() < 1 {
        return Err(Error::InvalidInput);
    }

    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(Error::InvalidInput);
    }

    let bytes = buf.split_to(len);
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

/// Reads a `u16`-length-prefixed UTF-8 string.
pub(crate) fn get_str16(buf: &mut Bytes) -> Result<String, Error> {
    if buf.remaining() < 2 {
        return Err(Error::InvalidInput);
    }

    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::InvalidInput);
    }

    let bytes = buf.split_to(len);
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

pub(crate) fn put_str8(buf: &mut BytesMut, s: &str) {
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn put_str16(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub(crate) fn get_array16(buf: &mut Bytes) -> Result<[u8; 16], Error> {
    if buf.remaining() < 16 {
        return Err(Error::InvalidInput);
    }

    let bytes = buf.split_to(16);
    Ok(bytes.as_ref().try_into()?)
}

pub(crate) fn get_array32(buf: &mut Bytes) -> Result<[u8; 32], Error> {
    if buf.remaining() < 32 {
        return Err(Error::InvalidInput);
    }

    let bytes = buf.split_to(32);
    Ok(bytes.as_ref().try_into()?)
}

pub(crate) fn get_array64(buf: &mut Bytes) -> Result<[u8; 64], Error> {
    if buf.remaining() < 64 {
        return Err(Error::InvalidInput);
    }

    let bytes = buf.split_to(64);
    Ok(bytes.as_ref().try_into()?)
}
