//! Rendezvous server: binds sender/receiver pairs by password hash, brokers
//! the PAKE exchange, then relays ciphertext it cannot read.

mod handlers;
pub mod ids;
pub mod mailbox;
pub mod relay;
pub mod server;

pub use ids::{IdLease, IdSet};
pub use mailbox::{Mailbox, MailboxError, Mailboxes, Side};
pub use relay::{PumpEnd, PumpStats};
pub use server::{RendezvousConfig, RendezvousServer, RendezvousState};
