//! End-to-end transfer messages.
//!
//! After PAKE every one of these is sealed with the session cipher before it
//! touches a socket, so the rendezvous only ever sees ciphertext.

use serde::{Deserialize, Serialize};

use super::{wire_enum, ControlMessage, ProtocolError};
use crate::error::MessageFamily;

/// Target plaintext bytes per payload frame.
pub const MAX_CHUNK_BYTES: u64 = 1 << 20;
/// Upper bound on the number of payload frames for a single transfer.
pub const MAX_SEND_CHUNKS: u64 = 200_000_000;

wire_enum! {
    /// Transfer message types. Ordinals are wire-visible.
    TransferMessageType, MessageFamily::Transfer, {
        TransferError = 0,
        ReceiverHandshake = 1,
        SenderHandshake = 2,
        ReceiverDirectCommunication = 3,
        SenderDirectAck = 4,
        ReceiverRelayCommunication = 5,
        SenderRelayAck = 6,
        ReceiverRequestPayload = 7,
        SenderPayloadSent = 8,
        ReceiverPayloadAck = 9,
        SenderClosing = 10,
        ReceiverClosingAck = 11,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Advisory only; receivers never enforce it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    #[serde(rename = "type")]
    pub kind: TransferMessageType,
    #[serde(default)]
    pub payload: TransferPayload,
}

impl TransferMessage {
    pub fn new(kind: TransferMessageType) -> Self {
        Self {
            kind,
            payload: TransferPayload::default(),
        }
    }

    /// Where the receiver may reach the sender's direct listener.
    pub fn sender_handshake(ip: impl Into<String>, port: u16, payload_size: i64) -> Self {
        let mut msg = Self::new(TransferMessageType::SenderHandshake);
        msg.payload.ip = Some(ip.into());
        msg.payload.port = Some(port);
        msg.payload.payload_size = Some(payload_size);
        msg
    }

    pub fn error(reason: impl Into<String>) -> Self {
        let mut msg = Self::new(TransferMessageType::TransferError);
        msg.payload.error = Some(reason.into());
        msg
    }

    /// `(ip, port)` of a `SenderHandshake`.
    pub fn direct_address(&self) -> Result<(&str, u16), ProtocolError> {
        let ip = self
            .payload
            .ip
            .as_deref()
            .ok_or(ProtocolError::MissingField("ip"))?;
        let port = self.payload.port.ok_or(ProtocolError::MissingField("port"))?;
        Ok((ip, port))
    }

    /// Try to read a decrypted frame as a control message.
    ///
    /// Anything that is not a JSON object with a known `type` yields `None`
    /// and is treated as payload by the caller.
    pub fn sniff(frame: &[u8]) -> Option<Self> {
        if frame.first() != Some(&b'{') {
            return None;
        }
        serde_json::from_slice(frame).ok()
    }
}

impl ControlMessage for TransferMessage {
    const FAMILY: MessageFamily = MessageFamily::Transfer;

    type Kind = TransferMessageType;

    fn kind(&self) -> TransferMessageType {
        self.kind
    }

    fn peer_error(&self) -> Option<String> {
        if self.kind != TransferMessageType::TransferError {
            return None;
        }
        Some(
            self.payload
                .error
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
        )
    }
}

/// Plaintext bytes per payload frame for a payload of `payload_size` bytes.
///
/// Aims for 1 MiB frames, grows the frame so the count never exceeds
/// [`MAX_SEND_CHUNKS`], and never goes below 1 MiB.
pub fn chunk_size(payload_size: i64) -> usize {
    let size = payload_size.max(0) as u64;
    let chunks = (size / MAX_CHUNK_BYTES).max(1);

    let chunk = if chunks > MAX_SEND_CHUNKS {
        size.div_ceil(MAX_SEND_CHUNKS)
    } else {
        MAX_CHUNK_BYTES
    };

    chunk.max(MAX_CHUNK_BYTES) as usize
}

// ============================================================================
// TESTS
// ============================================================================
