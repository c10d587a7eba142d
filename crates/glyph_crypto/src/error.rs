use thiserror::Error;

/// Errors surfaced by the primitive, identity, and KEP layers (C1/C2/C4).
///
/// `IntegrityError` and `SignatureError` must be indistinguishable in timing
/// and behavior whether the cause is a wrong key, a flipped bit, or a
/// forgery attempt.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Signature verification failed")]
    SignatureError,

    #[error("AEAD authentication tag mismatch")]
    IntegrityError,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Nonce generation failed")]
    NonceGeneration,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
