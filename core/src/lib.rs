// Dropway core: password-authenticated, end-to-end encrypted file transfer
//
// A sender and a receiver that share only a short spoken password meet at a
// rendezvous server, agree on a key with SPAKE2, and move the payload either
// directly (same network) or through the rendezvous relay, which only ever
// sees ciphertext.

pub mod config;
pub mod conn;
pub mod crypto;
pub mod error;
pub mod events;
pub mod net;
pub mod password;
pub mod protocol;
pub mod receiver;
pub mod rendezvous;
pub mod sender;
pub mod version;

pub use config::ClientConfig;
pub use error::{MessageFamily, TransferError};
pub use events::{EventSink, TransferEvent, TransferType};
pub use password::Password;
pub use receiver::Receiver;
pub use rendezvous::{RendezvousConfig, RendezvousServer};
pub use sender::Sender;
pub use version::Version;
