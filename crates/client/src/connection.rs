//! Frame-level read/write over a TCP stream to the discovery service.

use bytes::BytesMut;
use codec::Frame;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Codec(codec::Error),
    /// The peer closed the stream before a complete frame arrived.
    Closed,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<codec::Error> for Error {
    fn from(value: codec::Error) -> Self {
        Self::Codec(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A framed connection to the discovery service: reads accumulate into an
/// internal buffer until [`Frame::decode`] can split a complete frame off
/// the front.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Connection {
    pub async fn connect(address: std::net::SocketAddr) -> Result<Self, Error> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
        })
    }

    pub async fn send(&mut self, packet_type: u16, payload: &[u8]) -> Result<(), Error> {
        let frame = Frame::encode(packet_type, payload);
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Reads one complete frame, blocking on socket reads as needed.
    pub async fn recv(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.read_buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Closed);
            }

            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads one frame with a deadline, used by the liveness prober and by
    /// every state transition that must not block indefinitely.
    pub async fn recv_timeout(&mut self, timeout: std::time::Duration) -> Result<Frame, Error> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }
}
