//! Authenticated Encryption with Associated Data (C1).
//!
//! AES-256-GCM. Key size: 32 bytes. IV: 96 bits (12 bytes), generated
//! *inside* `seal` from a CSRNG — callers never choose their own IV, which
//! is what keeps the "IV is unique per sendKey" invariant enforceable.
//! Tag: 128 bits (16 bytes). Associated data is empty in v1 (see spec §9 —
//! binding `(sessionId, sender, receiver, seq)` into the AAD is a wire-format
//! change deferred to a future version; callers pass `b""`).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    aes::cipher::consts::U12,
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Output of `seal`: ciphertext, the IV used, and the detached auth tag.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` with a 32-byte key, drawing a fresh random IV.
pub fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let mut combined = cipher
        .encrypt(&nonce, aes_gcm::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::IntegrityError)?;

    let tag_bytes = combined.split_off(combined.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce);

    Ok(Sealed {
        ciphertext: combined,
        iv,
        tag,
    })
}

/// Decrypt `ciphertext` given the 32-byte key, 12-byte IV, and 16-byte tag.
///
/// Fails with `IntegrityError` on any tag mismatch — this is indistinguishable
/// in timing and error shape from decrypting with the wrong key, by
/// construction of the underlying AEAD primitive.
pub fn open(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Nonce::from_slice(iv);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    open_combined(&cipher, nonce, &combined, b"")
}

fn open_combined(
    cipher: &Aes256Gcm,
    nonce: &Nonce<U12>,
    combined: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let plaintext = cipher
        .decrypt(nonce, aes_gcm::aead::Payload { msg: combined, aad })
        .map_err(|_| CryptoError::IntegrityError)?;
    Ok(Zeroizing::new(plaintext))
}

/// Same as `open`, but with explicit associated data (used once AAD binding
/// is introduced; exercised today only by `wrap_key`/`unwrap_key` below).
pub fn open_aad(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Nonce::from_slice(iv);
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    open_combined(&cipher, nonce, &combined, aad)
}

/// Seal a 32-byte key under another 32-byte key-encryption key (at-rest
/// sealing of identity private keys and session keys, C2/C3).
pub fn wrap_key(kek: &[u8; 32], key_to_wrap: &[u8; 32]) -> Result<Sealed, CryptoError> {
    seal(kek, key_to_wrap, b"glyph-key-wrap-v1")
}

/// Unwrap a key sealed by `wrap_key`.
pub fn unwrap_key(
    kek: &[u8; 32],
    sealed: &Sealed,
) -> Result<[u8; 32], CryptoError> {
    let plaintext = open_aad(
        kek,
        &sealed.iv,
        &sealed.ciphertext,
        &sealed.tag,
        b"glyph-key-wrap-v1",
    )?;
    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKey("unwrapped key wrong length".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"hello world", b"").unwrap();
        let pt = open(&key, &sealed.iv, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(&pt[..], b"hello world");
    }

    #[test]
    fn wrong_key_is_integrity_error() {
        let key = [7u8; 32];
        let other = [9u8; 32];
        let sealed = seal(&key, b"hello world", b"").unwrap();
        let err = open(&other, &sealed.iv, &sealed.ciphertext, &sealed.tag).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityError));
    }

    #[test]
    fn tampered_ciphertext_is_integrity_error() {
        let key = [7u8; 32];
        let mut sealed = seal(&key, b"hello world", b"").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        let err = open(&key, &sealed.iv, &sealed.ciphertext, &sealed.tag).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityError));
    }

    #[test]
    fn ivs_are_random_per_call() {
        let key = [1u8; 32];
        let a = seal(&key, b"x", b"").unwrap();
        let b = seal(&key, b"x", b"").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn key_wrap_roundtrip() {
        let kek = [3u8; 32];
        let inner = [42u8; 32];
        let sealed = wrap_key(&kek, &inner).unwrap();
        let out = unwrap_key(&kek, &sealed).unwrap();
        assert_eq!(out, inner);
    }
}
