use thiserror::Error;

use glyph_crypto::CryptoError;
use glyph_proto::ProtoError;

/// Errors surfaced by the identity store, session keystore, and security
/// log sink (C2/C3/C8).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFoundError(String),

    #[error("Incorrect password")]
    WrongPasswordError,

    #[error("User {user_id} is not a party to session {session_id}")]
    AccessDenied { user_id: String, session_id: String },

    #[error("KEK cache has no entry for user {0} — call init(userId, password) first")]
    VaultLocked(String),

    #[error("Migration error: {0}")]
    Migration(String),
}
