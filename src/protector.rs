use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, ProtectError};

/// Purpose string for the session-cookie envelope. The version suffix is
/// bumped whenever the envelope layout changes, invalidating old envelopes.
pub const COOKIE_PURPOSE: &str = "Cookie.v1";
/// Purpose string for the bearer-token envelope.
pub const TOKEN_PURPOSE: &str = "Token.v1";
/// Purpose string for the cross-redirect extra-data bag.
pub const EXTRA_PURPOSE: &str = "Extra.v1";

/// Root of the protector hierarchy, holding the externally managed key.
///
/// Purpose-scoped [`Protector`]s are derived from it; an envelope produced
/// for one purpose can never be opened under another.
#[derive(Clone)]
pub struct RootProtector {
    key: [u8; 32],
}

impl RootProtector {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parses a hex-encoded 32-byte root key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRootKey`] if the hex is invalid or the key
    /// length is not 32 bytes.
    pub fn from_hex(key_hex: &str) -> Result<Self, Error> {
        let bytes =
            hex::decode(key_hex).map_err(|e| Error::InvalidRootKey(format!("invalid hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidRootKey(format!(
                "invalid key length: expected 32, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Derives the purpose-scoped protector.
    ///
    /// `subkey = SHA-256(root key || purpose)`; the purpose string is also
    /// bound as AAD so even a colliding subkey cannot cross purposes.
    #[must_use]
    pub fn derive(&self, purpose: &str) -> Protector {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(purpose.as_bytes());
        let subkey: [u8; 32] = hasher.finalize().into();
        Protector {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&subkey)),
            purpose: purpose.to_string(),
        }
    }
}

impl std::fmt::Debug for RootProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key never reaches logs.
        f.debug_struct("RootProtector").finish_non_exhaustive()
    }
}

/// Purpose-scoped authenticated encryption.
///
/// `protect` produces `base64url(nonce || ciphertext)` without padding;
/// `unprotect` reverses it. Any tampering, truncation or purpose mismatch
/// fails the integrity check.
#[derive(Clone)]
pub struct Protector {
    cipher: ChaCha20Poly1305,
    purpose: String,
}

impl Protector {
    /// Encrypts and authenticates `data` into a URL-safe string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtectError::Integrity`] if the cipher rejects the input
    /// (practically unreachable for in-memory payloads).
    pub fn protect(&self, data: &[u8]) -> Result<String, ProtectError> {
        let nonce_bytes: [u8; 12] = rand::rng().random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let payload = Payload {
            msg: data,
            aad: self.purpose.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|_| ProtectError::Integrity)?;

        let mut sealed = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypts a string produced by [`protect`](Self::protect).
    ///
    /// # Errors
    ///
    /// Returns a [`ProtectError`] on malformed base64, truncated input or
    /// failed authentication. Callers treat every error as "no envelope".
    pub fn unprotect(&self, sealed: &str) -> Result<Vec<u8>, ProtectError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed.as_bytes())
            .map_err(|_| ProtectError::Encoding)?;
        if bytes.len() < 12 {
            return Err(ProtectError::Truncated);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(12);
        let payload = Payload {
            msg: ciphertext,
            aad: self.purpose.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| ProtectError::Integrity)
    }
}

impl std::fmt::Debug for Protector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protector")
            .field("purpose", &self.purpose)
            .finish_non_exhaustive()
    }
}
