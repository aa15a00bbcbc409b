// In-process frame pipe for unit tests

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::FrameConn;
use crate::error::TransferError;

pub(crate) struct MemoryConn {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Two connected ends.
pub(crate) fn pair() -> (MemoryConn, MemoryConn) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryConn {
            tx: Some(a_tx),
            rx: b_rx,
        },
        MemoryConn {
            tx: Some(b_tx),
            rx: a_rx,
        },
    )
}

#[async_trait]
impl FrameConn for MemoryConn {
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        let tx = self.tx.as_ref().ok_or(TransferError::TransportClosed)?;
        tx.send(frame).map_err(|_| TransferError::TransportClosed)
    }

    async fn read(&mut self) -> Result<Vec<u8>, TransferError> {
        self.rx.recv().await.ok_or(TransferError::TransportClosed)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.tx = None;
        Ok(())
    }
}
