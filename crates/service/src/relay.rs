//! Resolves `(session_id, recipient_id)` to a live connection and forwards
//! SDP/ICE frames verbatim — the relay never parses their contents.
//!
//! Grounded in the same register/send_to/broadcast shape a standalone
//! signaling microservice in this codebase's history used for its
//! websocket fan-out, adapted here to the framed TCP wire format and to a
//! `recipient_id == zero` broadcast instead of an explicit broadcast call.

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ServiceError;

pub type Outbox = UnboundedSender<bytes::Bytes>;

const ZERO_ID: [u8; 16] = [0u8; 16];

/// Live connection table, keyed by `(session_id, participant_id)`.
pub struct Relay {
    connections: DashMap<([u8; 16], [u8; 16]), Outbox, ahash::RandomState>,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            connections: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: [u8; 16], participant_id: [u8; 16], outbox: Outbox) {
        self.connections.insert((session_id, participant_id), outbox);
    }

    pub fn remove(&self, session_id: [u8; 16], participant_id: [u8; 16]) {
        self.connections.remove(&(session_id, participant_id));
    }

    /// Forwards `frame` to the named recipient, or to every other
    /// participant in the session when `recipient_id` is all-zero.
    ///
    /// A missing targeted recipient is a `PROTOCOL` error to the sender; a
    /// broadcast with zero live recipients is not an error (`§4.6`).
    pub fn forward(
        &self,
        session_id: [u8; 16],
        sender_id: [u8; 16],
        recipient_id: [u8; 16],
        frame: bytes::Bytes,
    ) -> Result<usize, ServiceError> {
        if recipient_id == ZERO_ID {
            let mut sent = 0;
            for entry in self.connections.iter() {
                let (sid, pid) = entry.key();
                if *sid == session_id && *pid != sender_id {
                    if entry.value().send(frame.clone()).is_ok() {
                        sent += 1;
                    }
                }
            }

            return Ok(sent);
        }

        match self.connections.get(&(session_id, recipient_id)) {
            Some(outbox) => {
                outbox.send(frame).map_err(|_| ServiceError::Protocol)?;
                Ok(1)
            }
            None => Err(ServiceError::Protocol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_recipient_is_protocol_error() {
        let relay = Relay::new();
        let result = relay.forward([1u8; 16], [2u8; 16], [3u8; 16], bytes::Bytes::from_static(b"x"));
        assert!(matches!(result, Err(ServiceError::Protocol)));
    }

    #[test]
    fn broadcast_excludes_sender() {
        let relay = Relay::new();
        let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();

        relay.register([1u8; 16], [1u8; 16], tx_a);
        relay.register([1u8; 16], [2u8; 16], tx_b);

        let sent = relay
            .forward([1u8; 16], [1u8; 16], ZERO_ID, bytes::Bytes::from_static(b"quality"))
            .unwrap();

        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), bytes::Bytes::from_static(b"quality"));
    }
}
