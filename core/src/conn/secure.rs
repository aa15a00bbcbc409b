// Encrypted framing: every frame is sealed with the session cipher

use async_trait::async_trait;

use super::FrameConn;
use crate::crypto::Cipher;
use crate::error::TransferError;

/// A [`FrameConn`] whose frames are AES-GCM sealed.
pub struct SecureConn<C> {
    inner: C,
    cipher: Cipher,
}

impl<C: FrameConn> SecureConn<C> {
    pub fn new(inner: C, cipher: Cipher) -> Self {
        Self { inner, cipher }
    }

    /// The underlying plaintext channel, e.g. for rendezvous control frames.
    pub fn raw(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: FrameConn> FrameConn for SecureConn<C> {
    async fn write(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        let sealed = self.cipher.encrypt(&frame)?;
        self.inner.write(sealed).await
    }

    async fn read(&mut self) -> Result<Vec<u8>, TransferError> {
        let sealed = self.inner.read().await?;
        Ok(self.cipher.decrypt(&sealed)?)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.inner.close().await
    }
}
