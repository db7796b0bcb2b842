//! Page-level authenticated encryption.
//!
//! The pager passes every non-header page body through a [`PageCipher`]
//! on its way to and from disk. The AAD is the page id, which binds a
//! ciphertext to its slot in the file: a page copied to another offset
//! fails authentication instead of decrypting silently.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, KeyInit, Nonce};
use common::{DbError, DbResult};
use rand::RngCore;

/// 12-byte IV plus 16-byte tag.
pub const ENCRYPTION_OVERHEAD: usize = IV_LEN + TAG_LEN;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

/// Symmetric page transform applied at the pager boundary.
pub trait PageCipher: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Bytes added to each stored page body.
    fn overhead(&self) -> usize;

    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> DbResult<Vec<u8>>;

    fn decrypt(&self, blob: &[u8], aad: &[u8]) -> DbResult<Vec<u8>>;
}

/// No-op cipher used when no key is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl PageCipher for Passthrough {
    fn is_enabled(&self) -> bool {
        false
    }

    fn overhead(&self) -> usize {
        0
    }

    fn encrypt(&self, plaintext: &[u8], _aad: &[u8]) -> DbResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, blob: &[u8], _aad: &[u8]) -> DbResult<Vec<u8>> {
        Ok(blob.to_vec())
    }
}

enum Keyed {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM page cipher; key length selects 128, 192, or 256-bit mode.
pub struct AesGcmCipher {
    keyed: Keyed,
}

impl AesGcmCipher {
    pub fn new(key: &[u8]) -> DbResult<Self> {
        let keyed = match key.len() {
            16 => Keyed::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).expect("length checked"),
            )),
            24 => Keyed::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).expect("length checked"),
            )),
            32 => Keyed::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).expect("length checked"),
            )),
            other => {
                return Err(DbError::InvalidArgument(format!(
                    "encryption key must be 16, 24, or 32 bytes, got {other}"
                )))
            }
        };
        Ok(AesGcmCipher { keyed })
    }
}

impl PageCipher for AesGcmCipher {
    fn is_enabled(&self) -> bool {
        true
    }

    fn overhead(&self) -> usize {
        ENCRYPTION_OVERHEAD
    }

    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> DbResult<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);
        let payload = Payload {
            msg: plaintext,
            aad,
        };

        let ciphertext = match &self.keyed {
            Keyed::Aes128(cipher) => cipher.encrypt(nonce, payload),
            Keyed::Aes192(cipher) => cipher.encrypt(nonce, payload),
            Keyed::Aes256(cipher) => cipher.encrypt(nonce, payload),
        }
        .map_err(|_| DbError::AuthenticationFailed)?;

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, blob: &[u8], aad: &[u8]) -> DbResult<Vec<u8>> {
        if blob.len() < ENCRYPTION_OVERHEAD {
            return Err(DbError::AuthenticationFailed);
        }
        let (iv, ciphertext) = blob.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };

        match &self.keyed {
            Keyed::Aes128(cipher) => cipher.decrypt(nonce, payload),
            Keyed::Aes192(cipher) => cipher.decrypt(nonce, payload),
            Keyed::Aes256(cipher) => cipher.decrypt(nonce, payload),
        }
        .map_err(|_| DbError::AuthenticationFailed)
    }
}

/// Fresh random salt for a new database file's header.
pub fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Build the cipher matching the configured key, if any.
pub fn cipher_for_key(key: Option<&[u8]>) -> DbResult<Box<dyn PageCipher>> {
    match key {
        Some(key) => Ok(Box::new(AesGcmCipher::new(key)?)),
        None => Ok(Box::new(Passthrough)),
    }
}
