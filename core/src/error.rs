//! Error taxonomy shared by the rendezvous server and both client engines.

use crate::version::Version;
use thiserror::Error;

/// Which message numbering an `UnexpectedMessage` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFamily {
    /// Client <-> rendezvous control messages.
    Rendezvous,
    /// End-to-end transfer messages (encrypted after PAKE).
    Transfer,
}

impl std::fmt::Display for MessageFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageFamily::Rendezvous => write!(f, "rendezvous"),
            MessageFamily::Transfer => write!(f, "transfer"),
        }
    }
}

/// Every way a transfer (or a rendezvous session) can fail.
///
/// Wire-level variants carry the integer ordinals of the expected and
/// received message types.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transport closed by peer")]
    TransportClosed,
    #[error("Unexpected {family} message: expected type {expected}, got {got}")]
    UnexpectedMessage {
        family: MessageFamily,
        expected: u8,
        got: u8,
    },
    #[error("PAKE exchange failed")]
    PakeFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Mailbox already has a receiver")]
    MailboxOccupied,
    #[error("No mailbox for this password")]
    NoSuchMailbox,
    #[error("No receiver arrived in time")]
    ReceiverTimeout,
    #[error("Direct connection to the sender could not be established")]
    DirectProbeFailed,
    #[error("Version mismatch: client {client}, rendezvous {server}")]
    VersionMismatch { client: Version, server: Version },
    #[error("Invalid password: {0}")]
    InvalidPassword(String),
    #[error("Peer reported an error: {0}")]
    PeerError(String),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for errors that mean "the other end went away".
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransferError::TransportClosed | TransferError::Transport(_)
        )
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Codec(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransferError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransferError::TransportClosed,
            WsError::Protocol(_) => TransferError::TransportClosed,
            other => TransferError::Transport(other.to_string()),
        }
    }
}

impl From<warp::Error> for TransferError {
    fn from(err: warp::Error) -> Self {
        TransferError::Transport(err.to_string())
    }
}

impl From<crate::crypto::CipherError> for TransferError {
    fn from(err: crate::crypto::CipherError) -> Self {
        match err {
            crate::crypto::CipherError::Decrypt | crate::crypto::CipherError::Truncated(_) => {
                TransferError::DecryptionFailed
            }
            other => TransferError::Codec(other.to_string()),
        }
    }
}

impl From<crate::crypto::PakeError> for TransferError {
    fn from(_err: crate::crypto::PakeError) -> Self {
        TransferError::PakeFailed
    }
}

impl From<crate::password::PasswordError> for TransferError {
    fn from(err: crate::password::PasswordError) -> Self {
        TransferError::InvalidPassword(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
