//! Control-message envelope shared by the rendezvous and transfer protocols.
//!
//! Every control message is one JSON object per frame:
//! `{"type": <int>, "payload": {...}}`. The two protocols number their
//! message types independently; see [`rendezvous`] and [`transfer`].

pub mod rendezvous;
pub mod transfer;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::error::{MessageFamily, TransferError};

pub use rendezvous::{RendezvousMessage, RendezvousMessageType, RendezvousPayload};
pub use transfer::{
    chunk_size, TransferMessage, TransferMessageType, TransferPayload, MAX_CHUNK_BYTES,
    MAX_SEND_CHUNKS,
};

/// Control message decode/validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown {family} message type {ordinal}")]
    UnknownType { family: MessageFamily, ordinal: u8 },
    #[error("Message is missing payload field `{0}`")]
    MissingField(&'static str),
}

impl From<ProtocolError> for TransferError {
    fn from(err: ProtocolError) -> Self {
        TransferError::Codec(err.to_string())
    }
}

/// A typed control message that travels as one JSON frame.
pub trait ControlMessage: Serialize + DeserializeOwned + Send {
    /// Numbering family, used for `UnexpectedMessage` reporting.
    const FAMILY: MessageFamily;

    type Kind: Copy + PartialEq + Into<u8> + Send;

    fn kind(&self) -> Self::Kind;

    /// Wire ordinal of this message's `type`.
    fn ordinal(&self) -> u8 {
        self.kind().into()
    }

    /// Reason carried by an error report from the peer, if this is one.
    fn peer_error(&self) -> Option<String> {
        None
    }

    fn to_bytes(&self) -> Result<Vec<u8>, TransferError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, TransferError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Define a wire enum whose JSON form is its integer ordinal.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $family:expr, {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "u8", into = "u8")]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl TryFrom<u8> for $name {
            type Error = $crate::protocol::ProtocolError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )+
                    ordinal => Err($crate::protocol::ProtocolError::UnknownType {
                        family: $family,
                        ordinal,
                    }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

pub(crate) use wire_enum;

/// Serde adapter for optional byte fields carried as base64 strings.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
