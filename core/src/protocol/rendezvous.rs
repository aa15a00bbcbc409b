//! Client <-> rendezvous control messages.
//!
//! These travel in the clear; only the password hash, PAKE messages and
//! salt are ever exchanged here.

use serde::{Deserialize, Serialize};

use super::{wire_enum, ControlMessage, ProtocolError};
use crate::error::MessageFamily;

wire_enum! {
    /// Rendezvous message types. Ordinals are wire-visible.
    RendezvousMessageType, MessageFamily::Rendezvous, {
        RendezvousToSenderBind = 0,
        SenderToRendezvousEstablish = 1,
        ReceiverToRendezvousEstablish = 2,
        RendezvousToSenderReady = 3,
        SenderToRendezvousPake = 4,
        RendezvousToReceiverPake = 5,
        ReceiverToRendezvousPake = 6,
        RendezvousToSenderPake = 7,
        SenderToRendezvousSalt = 8,
        RendezvousToReceiverSalt = 9,
        ReceiverToRendezvousClose = 10,
        SenderToRendezvousClose = 11,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Hex SHA-256 of the transfer password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::base64_bytes"
    )]
    pub pake_bytes: Option<Vec<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "super::base64_bytes"
    )]
    pub salt: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousMessage {
    #[serde(rename = "type")]
    pub kind: RendezvousMessageType,
    #[serde(default)]
    pub payload: RendezvousPayload,
}

impl RendezvousMessage {
    pub fn new(kind: RendezvousMessageType) -> Self {
        Self {
            kind,
            payload: RendezvousPayload::default(),
        }
    }

    pub fn bind(id: u64) -> Self {
        let mut msg = Self::new(RendezvousMessageType::RendezvousToSenderBind);
        msg.payload.id = Some(id);
        msg
    }

    /// `SenderToRendezvousEstablish` or `ReceiverToRendezvousEstablish`.
    pub fn establish(kind: RendezvousMessageType, password_hash: impl Into<String>) -> Self {
        let mut msg = Self::new(kind);
        msg.payload.password = Some(password_hash.into());
        msg
    }

    /// Any of the four PAKE hops.
    pub fn pake(kind: RendezvousMessageType, bytes: Vec<u8>) -> Self {
        let mut msg = Self::new(kind);
        msg.payload.pake_bytes = Some(bytes);
        msg
    }

    /// Either salt hop.
    pub fn salt(kind: RendezvousMessageType, salt: Vec<u8>) -> Self {
        let mut msg = Self::new(kind);
        msg.payload.salt = Some(salt);
        msg
    }

    pub fn id(&self) -> Result<u64, ProtocolError> {
        self.payload.id.ok_or(ProtocolError::MissingField("id"))
    }

    pub fn password_hash(&self) -> Result<&str, ProtocolError> {
        self.payload
            .password
            .as_deref()
            .ok_or(ProtocolError::MissingField("password"))
    }

    pub fn into_pake_bytes(self) -> Result<Vec<u8>, ProtocolError> {
        self.payload
            .pake_bytes
            .ok_or(ProtocolError::MissingField("pake_bytes"))
    }

    pub fn into_salt(self) -> Result<Vec<u8>, ProtocolError> {
        self.payload.salt.ok_or(ProtocolError::MissingField("salt"))
    }
}

impl ControlMessage for RendezvousMessage {
    const FAMILY: MessageFamily = MessageFamily::Rendezvous;

    type Kind = RendezvousMessageType;

    fn kind(&self) -> RendezvousMessageType {
        self.kind
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_wire_shape() {
        let value = serde_json::to_value(RendezvousMessage::bind(3)).unwrap();
        assert_eq!(value, json!({"type": 0, "payload": {"id": 3}}));
    }

    #[test]
    fn test_bytes_are_base64() {
        let msg = RendezvousMessage::pake(
            RendezvousMessageType::SenderToRendezvousPake,
            vec![0xde, 0xad, 0xbe, 0xef],
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": 4, "payload": {"pake_bytes": "3q2+7w=="}}));

        let back = RendezvousMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back.into_pake_bytes().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_close_ordinals() {
        assert_eq!(u8::from(RendezvousMessageType::ReceiverToRendezvousClose), 10);
        assert_eq!(u8::from(RendezvousMessageType::SenderToRendezvousClose), 11);
    }

    #[test]
    fn test_missing_payload_accepted() {
        let msg = RendezvousMessage::from_bytes(br#"{"type":3}"#).unwrap();
        assert_eq!(msg.kind, RendezvousMessageType::RendezvousToSenderReady);
        assert_eq!(msg.id(), Err(ProtocolError::MissingField("id")));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(RendezvousMessage::from_bytes(br#"{"type":12,"payload":{}}"#).is_err());
        assert!(RendezvousMessage::from_bytes(br#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn test_establish_carries_hash() {
        let msg = RendezvousMessage::establish(
            RendezvousMessageType::ReceiverToRendezvousEstablish,
            "abcd",
        );
        assert_eq!(msg.ordinal(), 2);
        assert_eq!(msg.password_hash().unwrap(), "abcd");
    }
}
