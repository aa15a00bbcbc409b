// Cryptography: SPAKE2 key agreement and the AES-GCM transfer cipher

pub mod cipher;
pub mod pake;

pub use cipher::{generate_salt, Cipher, CipherError, NONCE_LEN, SALT_LEN, TAG_LEN};
pub use pake::{Pake, PakeError, PakeRole};
