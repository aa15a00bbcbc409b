// SPAKE2 handshake wrapper
//
// The sender is side A, the receiver side B. Each side produces one outbound
// message; feeding the peer's message into `finish` yields the shared session
// key. A peer that used a different password still completes `finish`, but
// with a different key, so the mismatch surfaces at the first decrypt.

use spake2::{Ed25519Group, Identity, Password, Spake2};
use thiserror::Error;

const SENDER_IDENTITY: &[u8] = b"dropway-sender";
const RECEIVER_IDENTITY: &[u8] = b"dropway-receiver";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PakeError {
    #[error("Peer PAKE message rejected")]
    BadPeerMessage,
    #[error("PAKE initialization did not complete")]
    Aborted,
}

/// Which end of the exchange this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakeRole {
    /// Initiator ("party 0").
    Sender,
    /// Responder ("party 1").
    Receiver,
}

/// One half-finished SPAKE2 exchange.
pub struct Pake {
    role: PakeRole,
    state: Spake2<Ed25519Group>,
    outbound: Vec<u8>,
}

impl Pake {
    /// Start the exchange for `role` with the shared password.
    ///
    /// Scalar multiplication makes this the slow part of the handshake;
    /// callers run it via [`Pake::start_blocking`] alongside network I/O.
    pub fn start(role: PakeRole, password: &str) -> Self {
        let password = Password::new(password.as_bytes());
        let id_a = Identity::new(SENDER_IDENTITY);
        let id_b = Identity::new(RECEIVER_IDENTITY);

        let (state, outbound) = match role {
            PakeRole::Sender => Spake2::<Ed25519Group>::start_a(&password, &id_a, &id_b),
            PakeRole::Receiver => Spake2::<Ed25519Group>::start_b(&password, &id_a, &id_b),
        };

        Self {
            role,
            state,
            outbound,
        }
    }

    /// Run [`Pake::start`] on the blocking pool and hand back its handle.
    pub fn start_blocking(
        role: PakeRole,
        password: String,
    ) -> tokio::task::JoinHandle<Pake> {
        tokio::task::spawn_blocking(move || Pake::start(role, &password))
    }

    /// Await a handle from [`Pake::start_blocking`].
    pub async fn join(handle: tokio::task::JoinHandle<Pake>) -> Result<Pake, PakeError> {
        handle.await.map_err(|_| PakeError::Aborted)
    }

    pub fn role(&self) -> PakeRole {
        self.role
    }

    /// Bytes to hand to the peer.
    pub fn message(&self) -> &[u8] {
        &self.outbound
    }

    /// Absorb the peer's message and return the session key.
    pub fn finish(self, peer_message: &[u8]) -> Result<Vec<u8>, PakeError> {
        self.state
            .finish(peer_message)
            .map_err(|_| PakeError::BadPeerMessage)
    }
}

impl std::fmt::Debug for Pake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pake")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
