//! Progress reporting from the transfer engines to whatever drives them.

use tokio::sync::mpsc;

/// How the payload travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    /// Receiver connected straight to the sender's listener.
    Direct,
    /// Ciphertext went through the rendezvous relay.
    Relay,
}

impl std::fmt::Display for TransferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferType::Direct => write!(f, "direct"),
            TransferType::Relay => write!(f, "relay"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The password to hand to the receiver (sender only).
    Password(String),
    /// The transfer mode was decided.
    Mode(TransferType),
    /// Cumulative payload bytes moved so far.
    Progress { bytes: u64 },
}

/// Optional event channel. Dropped receivers are ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// A connected sink and the stream of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
