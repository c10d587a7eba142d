//! Database row models (C2/C3/C8) — these map to/from SQL rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per local user (§3 Identity record). The private key is never
/// stored in plaintext; `sealed_private_key`/`salt`/`iv`/`tag` are the
/// components of an AES-256-GCM ciphertext under a PBKDF2-derived KEK.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityRow {
    pub user_id: String,
    pub sealed_private_key: String,
    pub salt: String,
    pub iv: String,
    pub tag: String,
    pub pbkdf2_iterations: i64,
    pub created_at: DateTime<Utc>,
}

/// One per ordered peer pair at a time (§3 Session state). Exactly one row
/// per (local, peer) pair may have `status = 'active'`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub local_user_id: String,
    pub peer_user_id: String,

    pub root_key_sealed: String,
    pub root_key_iv: String,
    pub root_key_tag: String,

    pub send_key_sealed: String,
    pub send_key_iv: String,
    pub send_key_tag: String,

    pub recv_key_sealed: String,
    pub recv_key_iv: String,
    pub recv_key_tag: String,

    pub last_seq: i64,
    pub last_timestamp: i64,
    /// JSON array of hex-encoded SHA-256 nonce hashes, oldest first,
    /// capped at the configured nonce window size.
    pub used_nonce_hashes: String,

    pub status: String,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub key_rotation_count: i64,
}

/// Append-only security event (§4.8). Never carries plaintext, key,
/// nonce, or ciphertext bytes — only identifiers, counters, reason codes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecurityLogRow {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub user_id: String,
    pub session_id: Option<String>,
    pub event_type: String,
    pub metadata: Option<String>,
    pub synced: bool,
}
