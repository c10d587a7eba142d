use thiserror::Error;

use glyph_crypto::CryptoError;

/// Errors surfaced by the envelope codec and file chunker (C5/C6).
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Timestamp outside the freshness window")]
    FreshnessError,

    #[error("Sequence number {seq} is not greater than lastSeq {last_seq} (nonce replayed: {replayed})")]
    OrderingError {
        seq: u64,
        last_seq: u64,
        /// Set when the envelope's nonce was also already recorded — an
        /// exact redelivery rather than merely a stale or out-of-order seq.
        replayed: bool,
    },

    #[error("Nonce has already been seen")]
    ReplayError,

    #[error("Envelope is structurally invalid: {0}")]
    MalformedEnvelope(String),

    #[error("File of {size} bytes exceeds the maximum of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Expected {expected} chunks, received {received}")]
    MissingChunks { expected: u32, received: u32 },

    #[error("Chunk indices do not form a contiguous [0, totalChunks) range")]
    IndexMismatch,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
