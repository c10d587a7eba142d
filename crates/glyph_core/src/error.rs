use thiserror::Error;

use glyph_crypto::CryptoError;
use glyph_proto::ProtoError;
use glyph_store::StoreError;

/// Top-level error surfaced at the Session Supervisor boundary (C7). All
/// lower-layer errors are recovered here for KEP; C5 errors during
/// receive are instead logged to C8 and the envelope is dropped (see
/// `glyph_proto::envelope`).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("peer did not acknowledge delivery of the KEP message")]
    PeerUnreachableError,

    #[error("no KEP response received within the configured timeout")]
    Timeout,
}
