//! Per-password mailboxes.
//!
//! A mailbox joins one sender connection to one receiver connection. Each
//! direction is a bounded single-producer queue of raw frames; `quit` is a
//! broadcast that tells both relay pumps to wind down.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::TransferError;
use crate::password::short_hash;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Mailbox already exists or has a receiver")]
    Occupied,
    #[error("No mailbox for this hash")]
    NotFound,
}

impl From<MailboxError> for TransferError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::Occupied => TransferError::MailboxOccupied,
            MailboxError::NotFound => TransferError::NoSuchMailbox,
        }
    }
}

/// Which endpoint of a mailbox a task serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Sender,
    Receiver,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Sender => write!(f, "sender"),
            Side::Receiver => write!(f, "receiver"),
        }
    }
}

/// Shared state of one sender/receiver pairing.
#[derive(Debug)]
pub struct Mailbox {
    hash: String,
    to_receiver: mpsc::Sender<Vec<u8>>,
    to_sender: mpsc::Sender<Vec<u8>>,
    receiver_inbox: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    receiver_arrived: Mutex<Option<oneshot::Sender<()>>>,
    has_receiver: AtomicBool,
    last_activity: Mutex<Instant>,
    quit: watch::Sender<bool>,
}

impl Mailbox {
    /// Truncated password hash, safe for logs.
    pub fn tag(&self) -> &str {
        short_hash(&self.hash)
    }

    pub fn has_receiver(&self) -> bool {
        self.has_receiver.load(Ordering::SeqCst)
    }

    /// Queue a frame for the opposite endpoint of `from`.
    pub async fn forward(&self, from: Side, frame: Vec<u8>) -> Result<(), TransferError> {
        self.touch();
        self.peer_queue(from)
            .send(frame)
            .await
            .map_err(|_| TransferError::TransportClosed)
    }

    /// Producer handle for the queue read by the opposite endpoint of `from`.
    pub fn peer_queue(&self, from: Side) -> mpsc::Sender<Vec<u8>> {
        match from {
            Side::Sender => self.to_receiver.clone(),
            Side::Receiver => self.to_sender.clone(),
        }
    }

    /// Record that a frame moved through the mailbox.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// When the mailbox counts as idle if nothing moves before then.
    pub fn idle_deadline(&self, limit: Duration) -> Instant {
        *self.last_activity.lock() + limit
    }

    pub fn subscribe_quit(&self) -> watch::Receiver<bool> {
        self.quit.subscribe()
    }

    pub fn is_quit(&self) -> bool {
        *self.quit.borrow()
    }

    /// Tell both endpoints to stop. Idempotent.
    pub fn quit(&self) {
        self.quit.send_replace(true);
    }
}

/// What the sender task keeps after creating a mailbox.
#[derive(Debug)]
pub struct SenderSlot {
    pub inbox: mpsc::Receiver<Vec<u8>>,
    pub receiver_arrived: oneshot::Receiver<()>,
}

/// Registry of live mailboxes, keyed by password hash.
#[derive(Debug, Clone)]
pub struct Mailboxes {
    inner: Arc<RwLock<HashMap<String, Arc<Mailbox>>>>,
    buffer: usize,
}

impl Mailboxes {
    /// `buffer` is the per-direction queue depth in frames.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Allocate a mailbox for a sender. Fails if the hash is already taken.
    pub fn create(&self, hash: &str) -> Result<(Arc<Mailbox>, SenderSlot), MailboxError> {
        let mut map = self.inner.write();
        if map.contains_key(hash) {
            return Err(MailboxError::Occupied);
        }

        let (to_receiver, receiver_inbox) = mpsc::channel(self.buffer);
        let (to_sender, sender_inbox) = mpsc::channel(self.buffer);
        let (arrived_tx, arrived_rx) = oneshot::channel();
        let (quit, _) = watch::channel(false);

        let mailbox = Arc::new(Mailbox {
            hash: hash.to_string(),
            to_receiver,
            to_sender,
            receiver_inbox: Mutex::new(Some(receiver_inbox)),
            receiver_arrived: Mutex::new(Some(arrived_tx)),
            has_receiver: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            quit,
        });
        map.insert(hash.to_string(), mailbox.clone());
        tracing::info!("Mailbox {} created", mailbox.tag());

        Ok((
            mailbox,
            SenderSlot {
                inbox: sender_inbox,
                receiver_arrived: arrived_rx,
            },
        ))
    }

    /// Attach a receiver to an existing mailbox and wake its sender.
    pub fn claim(
        &self,
        hash: &str,
    ) -> Result<(Arc<Mailbox>, mpsc::Receiver<Vec<u8>>), MailboxError> {
        let mailbox = self
            .inner
            .read()
            .get(hash)
            .cloned()
            .ok_or(MailboxError::NotFound)?;

        if mailbox.has_receiver.swap(true, Ordering::SeqCst) {
            return Err(MailboxError::Occupied);
        }

        let inbox = mailbox
            .receiver_inbox
            .lock()
            .take()
            .ok_or(MailboxError::Occupied)?;

        mailbox.touch();
        if let Some(arrived) = mailbox.receiver_arrived.lock().take() {
            // The sender may already have timed out; the pump will notice
            let _ = arrived.send(());
        }
        tracing::info!("Mailbox {} claimed by receiver", mailbox.tag());

        Ok((mailbox, inbox))
    }

    /// Drop `mailbox` from the registry if it is still the registered one.
    ///
    /// Returns false when someone else already removed it.
    pub fn remove(&self, mailbox: &Arc<Mailbox>) -> bool {
        let mut map = self.inner.write();
        match map.get(&mailbox.hash) {
            Some(current) if Arc::ptr_eq(current, mailbox) => {
                map.remove(&mailbox.hash);
                tracing::info!("Mailbox {} removed", mailbox.tag());
                true
            }
            _ => false,
        }
    }

    /// Fire every mailbox's quit signal.
    pub fn quit_all(&self) {
        for mailbox in self.inner.read().values() {
            mailbox.quit();
        }
    }

    pub fn get(&self, hash: &str) -> Option<Arc<Mailbox>> {
        self.inner.read().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Quits and unregisters a mailbox when its owning task ends.
pub struct MailboxGuard {
    mailboxes: Mailboxes,
    mailbox: Arc<Mailbox>,
}

impl MailboxGuard {
    pub fn new(mailboxes: Mailboxes, mailbox: Arc<Mailbox>) -> Self {
        Self { mailboxes, mailbox }
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }
}

impl Drop for MailboxGuard {
    fn drop(&mut self) {
        self.mailbox.quit();
        self.mailboxes.remove(&self.mailbox);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_duplicate_hash() {
        let boxes = Mailboxes::new(4);
        let _first = boxes.create("aaaa").unwrap();
        assert_eq!(boxes.create("aaaa").unwrap_err(), MailboxError::Occupied);
        assert_eq!(boxes.len(), 1);
    }

    #[test]
    fn test_claim_missing() {
        let boxes = Mailboxes::new(4);
        assert_eq!(boxes.claim("nope").unwrap_err(), MailboxError::NotFound);
    }

    #[tokio::test]
    async fn test_claim_once_and_signal_sender() {
        let boxes = Mailboxes::new(4);
        let (mailbox, slot) = boxes.create("hash").unwrap();

        let (claimed, _inbox) = boxes.claim("hash").unwrap();
        assert!(Arc::ptr_eq(&mailbox, &claimed));
        assert!(mailbox.has_receiver());
        slot.receiver_arrived.await.unwrap();

        assert_eq!(boxes.claim("hash").unwrap_err(), MailboxError::Occupied);
    }

    #[tokio::test]
    async fn test_forward_between_sides() {
        let boxes = Mailboxes::new(4);
        let (mailbox, mut slot) = boxes.create("hash").unwrap();
        let (_, mut receiver_inbox) = boxes.claim("hash").unwrap();

        mailbox.forward(Side::Sender, b"to receiver".to_vec()).await.unwrap();
        mailbox.forward(Side::Receiver, b"to sender".to_vec()).await.unwrap();

        assert_eq!(receiver_inbox.recv().await.unwrap(), b"to receiver");
        assert_eq!(slot.inbox.recv().await.unwrap(), b"to sender");
    }

    #[test]
    fn test_queue_is_bounded() {
        let boxes = Mailboxes::new(2);
        let (mailbox, _slot) = boxes.create("hash").unwrap();
        let queue = mailbox.peer_queue(Side::Sender);
        assert!(queue.try_send(vec![1]).is_ok());
        assert!(queue.try_send(vec![2]).is_ok());
        assert!(queue.try_send(vec![3]).is_err());
    }

    #[test]
    fn test_remove_only_current_instance() {
        let boxes = Mailboxes::new(4);
        let (old, _slot) = boxes.create("hash").unwrap();
        assert!(boxes.remove(&old));
        assert!(!boxes.remove(&old));

        let (new, _slot) = boxes.create("hash").unwrap();
        assert!(!boxes.remove(&old));
        assert!(boxes.get("hash").is_some());
        assert!(boxes.remove(&new));
    }

    #[test]
    fn test_guard_quits_and_removes() {
        let boxes = Mailboxes::new(4);
        let (mailbox, _slot) = boxes.create("hash").unwrap();
        let quit = mailbox.subscribe_quit();
        drop(MailboxGuard::new(boxes.clone(), mailbox.clone()));

        assert!(boxes.is_empty());
        assert!(*quit.borrow());
        assert!(mailbox.is_quit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_pushes_idle_deadline() {
        let boxes = Mailboxes::new(4);
        let (mailbox, _slot) = boxes.create("hash").unwrap();
        let limit = Duration::from_secs(30);
        let first = mailbox.idle_deadline(limit);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(mailbox.idle_deadline(limit), first);

        mailbox.touch();
        assert_eq!(mailbox.idle_deadline(limit), first + Duration::from_secs(10));
    }

    #[test]
    fn test_quit_all() {
        let boxes = Mailboxes::new(4);
        let (a, _sa) = boxes.create("a").unwrap();
        let (b, _sb) = boxes.create("b").unwrap();
        boxes.quit_all();
        assert!(a.is_quit() && b.is_quit());
    }
}
