//! Session Keystore (C3): persists per-session symmetric state at rest,
//! sealed under the per-user KEK cache, with access control and the
//! nonce-replay window.

use std::collections::VecDeque;

use base64::{engine::general_purpose::STANDARD, Engine};
use glyph_proto::ReplayGuard;
use hex::ToHex;
use sqlx::SqlitePool;

use glyph_crypto::aead;

use crate::error::StoreError;
use crate::kek_cache::KekCache;
use crate::models::SessionRow;

/// Size of the nonce-replay ring buffer (§6 configuration, `nonce_window`).
pub const NONCE_WINDOW: usize = 200;

/// Decrypted view of a session's keys, returned by [`SessionKeystore::load`].
pub struct SessionView {
    pub session_id: String,
    pub local_user_id: String,
    pub peer_user_id: String,
    pub root_key: [u8; 32],
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub last_seq: u64,
    pub status: String,
}

impl std::fmt::Debug for SessionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionView")
            .field("session_id", &self.session_id)
            .field("local_user_id", &self.local_user_id)
            .field("peer_user_id", &self.peer_user_id)
            .field("root_key", &"<redacted>")
            .field("send_key", &"<redacted>")
            .field("recv_key", &"<redacted>")
            .field("last_seq", &self.last_seq)
            .field("status", &self.status)
            .finish()
    }
}

/// In-memory ordering/replay state for one session, loaded once per
/// receive operation and saved back after [`glyph_proto::envelope::open_message`]
/// accepts or rejects.
pub struct SessionReplayState {
    last_seq: u64,
    window: VecDeque<[u8; 32]>,
}

impl ReplayGuard for SessionReplayState {
    fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn advance_seq(&mut self, seq: u64) {
        self.last_seq = seq;
    }

    fn has_seen_nonce_hash(&self, nonce_hash: &[u8; 32]) -> bool {
        self.window.contains(nonce_hash)
    }

    fn record_nonce_hash(&mut self, nonce_hash: [u8; 32]) {
        if self.window.len() >= NONCE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(nonce_hash);
    }
}

#[derive(Clone)]
pub struct SessionKeystore {
    pool: SqlitePool,
    kek_cache: KekCache,
}

impl SessionKeystore {
    pub fn new(pool: SqlitePool, kek_cache: KekCache) -> Self {
        Self { pool, kek_cache }
    }

    /// Seal and persist a freshly derived session. Any prior `active`
    /// session for the same (local, peer) pair is left untouched — callers
    /// drive supersession explicitly via [`SessionKeystore::supersede`].
    pub async fn create(
        &self,
        session_id: &str,
        local_user_id: &str,
        peer_user_id: &str,
        root_key: &[u8; 32],
        send_key: &[u8; 32],
        recv_key: &[u8; 32],
    ) -> Result<(), StoreError> {
        let (root_ct, root_iv, root_tag) = self.seal_for(local_user_id, root_key).await?;
        let (send_ct, send_iv, send_tag) = self.seal_for(local_user_id, send_key).await?;
        let (recv_ct, recv_iv, recv_tag) = self.seal_for(local_user_id, recv_key).await?;

        sqlx::query(
            "INSERT INTO sessions (
                id, local_user_id, peer_user_id,
                root_key_sealed, root_key_iv, root_key_tag,
                send_key_sealed, send_key_iv, send_key_tag,
                recv_key_sealed, recv_key_iv, recv_key_tag,
                last_seq, last_timestamp, used_nonce_hashes,
                status, status_reason, created_at, updated_at, key_rotation_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, '[]', 'active', NULL, datetime('now'), datetime('now'), 0)",
        )
        .bind(session_id)
        .bind(local_user_id)
        .bind(peer_user_id)
        .bind(root_ct).bind(root_iv).bind(root_tag)
        .bind(send_ct).bind(send_iv).bind(send_tag)
        .bind(recv_ct).bind(recv_iv).bind(recv_tag)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Decrypt the session's keys on demand. `user_id` must be a party to
    /// the session or this fails with `AccessDenied`.
    pub async fn load(&self, session_id: &str, user_id: &str) -> Result<SessionView, StoreError> {
        let row = self.fetch_row(session_id).await?;
        if user_id != row.local_user_id && user_id != row.peer_user_id {
            return Err(StoreError::AccessDenied {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            });
        }

        let root_key = self
            .unseal_for(
                &row.local_user_id,
                &row.root_key_sealed,
                &row.root_key_iv,
                &row.root_key_tag,
            )
            .await?;
        let send_key = self
            .unseal_for(
                &row.local_user_id,
                &row.send_key_sealed,
                &row.send_key_iv,
                &row.send_key_tag,
            )
            .await?;
        let recv_key = self
            .unseal_for(
                &row.local_user_id,
                &row.recv_key_sealed,
                &row.recv_key_iv,
                &row.recv_key_tag,
            )
            .await?;

        Ok(SessionView {
            session_id: row.id,
            local_user_id: row.local_user_id,
            peer_user_id: row.peer_user_id,
            root_key,
            send_key,
            recv_key,
            last_seq: row.last_seq as u64,
            status: row.status,
        })
    }

    /// Load the ordering/replay window for `session_id` into memory.
    pub async fn load_replay_state(&self, session_id: &str) -> Result<SessionReplayState, StoreError> {
        let row = self.fetch_row(session_id).await?;
        let hashes: Vec<String> = serde_json::from_str(&row.used_nonce_hashes)?;
        let mut window = VecDeque::with_capacity(hashes.len());
        for h in hashes {
            let bytes = hex::decode(&h).map_err(glyph_crypto::CryptoError::HexDecode)?;
            if bytes.len() != 32 {
                continue;
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            window.push_back(arr);
        }
        Ok(SessionReplayState {
            last_seq: row.last_seq as u64,
            window,
        })
    }

    /// Persist the result of a receive operation back to the session row.
    pub async fn save_replay_state(
        &self,
        session_id: &str,
        state: &SessionReplayState,
    ) -> Result<(), StoreError> {
        let hashes: Vec<String> = state.window.iter().map(|h| h.encode_hex()).collect();
        let json = serde_json::to_string(&hashes)?;
        sqlx::query(
            "UPDATE sessions SET last_seq = ?, used_nonce_hashes = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(state.last_seq as i64)
        .bind(json)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_seq(&self, session_id: &str, seq: u64) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET last_seq = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(seq as i64)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_nonce(&self, session_id: &str, nonce_hash: &[u8; 32]) -> Result<(), StoreError> {
        let mut state = self.load_replay_state(session_id).await?;
        state.record_nonce_hash(*nonce_hash);
        self.save_replay_state(session_id, &state).await
    }

    pub async fn is_nonce_seen(&self, session_id: &str, nonce_hash: &[u8; 32]) -> Result<bool, StoreError> {
        let state = self.load_replay_state(session_id).await?;
        Ok(state.has_seen_nonce_hash(nonce_hash))
    }

    /// Look up the current `active` session, if any, for an ordered pair.
    pub async fn find_active(
        &self,
        local_user_id: &str,
        peer_user_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM sessions WHERE local_user_id = ? AND peer_user_id = ? AND status = 'active'",
        )
        .bind(local_user_id)
        .bind(peer_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Transition any prior `active` session for this pair to `inactive`.
    pub async fn supersede(
        &self,
        local_user_id: &str,
        peer_user_id: &str,
        new_session_id: &str,
    ) -> Result<(), StoreError> {
        let reason = format!("Superseded by {new_session_id}");
        sqlx::query(
            "UPDATE sessions SET status = 'inactive', status_reason = ?, updated_at = datetime('now')
             WHERE local_user_id = ? AND peer_user_id = ? AND status = 'active' AND id != ?",
        )
        .bind(reason)
        .bind(local_user_id)
        .bind(peer_user_id)
        .bind(new_session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reseed `sendKey`/`recvKey` after an ephemeral rekey (C7's
    /// `rotate`), discarding the prior keys so traffic sent after
    /// rotation is cryptographically independent of traffic before it.
    pub async fn rotate_keys(
        &self,
        session_id: &str,
        local_user_id: &str,
        new_root_key: &[u8; 32],
        new_send_key: &[u8; 32],
        new_recv_key: &[u8; 32],
    ) -> Result<(), StoreError> {
        let (root_ct, root_iv, root_tag) = self.seal_for(local_user_id, new_root_key).await?;
        let (send_ct, send_iv, send_tag) = self.seal_for(local_user_id, new_send_key).await?;
        let (recv_ct, recv_iv, recv_tag) = self.seal_for(local_user_id, new_recv_key).await?;

        sqlx::query(
            "UPDATE sessions SET
                root_key_sealed = ?, root_key_iv = ?, root_key_tag = ?,
                send_key_sealed = ?, send_key_iv = ?, send_key_tag = ?,
                recv_key_sealed = ?, recv_key_iv = ?, recv_key_tag = ?,
                key_rotation_count = key_rotation_count + 1,
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(root_ct).bind(root_iv).bind(root_tag)
        .bind(send_ct).bind(send_iv).bind(send_tag)
        .bind(recv_ct).bind(recv_iv).bind(recv_tag)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_row(&self, session_id: &str) -> Result<SessionRow, StoreError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFoundError(format!("session {session_id}")))
    }

    async fn seal_for(
        &self,
        local_user_id: &str,
        key: &[u8; 32],
    ) -> Result<(String, String, String), StoreError> {
        let sealed = self
            .kek_cache
            .with_key(local_user_id, |kek| Ok(aead::seal(kek, key, b"")?))
            .await?;
        Ok((
            STANDARD.encode(&sealed.ciphertext),
            STANDARD.encode(sealed.iv),
            STANDARD.encode(sealed.tag),
        ))
    }

    async fn unseal_for(
        &self,
        local_user_id: &str,
        ciphertext_b64: &str,
        iv_b64: &str,
        tag_b64: &str,
    ) -> Result<[u8; 32], StoreError> {
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(glyph_crypto::CryptoError::Base64Decode)?;
        let iv = decode_fixed::<12>(iv_b64)?;
        let tag = decode_fixed::<16>(tag_b64)?;

        let plaintext = self
            .kek_cache
            .with_key(local_user_id, |kek| {
                Ok(aead::open(kek, &iv, &ciphertext, &tag)?)
            })
            .await?;
        if plaintext.len() != 32 {
            return Err(StoreError::Crypto(glyph_crypto::CryptoError::InvalidKey(
                "sealed session key is not 32 bytes".into(),
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&plaintext);
        Ok(out)
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], StoreError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(glyph_crypto::CryptoError::Base64Decode)?;
    if bytes.len() != N {
        return Err(StoreError::Crypto(glyph_crypto::CryptoError::InvalidKey(
            format!("expected {N} bytes, got {}", bytes.len()),
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_keystore() -> SessionKeystore {
        let pool = SqlitePoolOptions::new()
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let kek_cache = KekCache::new();
        kek_cache
            .init("alice", b"pw", &[0u8; 16], glyph_crypto::kdf::MIN_PBKDF2_ITERATIONS)
            .await
            .unwrap();
        SessionKeystore::new(pool, kek_cache)
    }

    #[tokio::test]
    async fn create_and_load_roundtrip() {
        let ks = test_keystore().await;
        let root = [1u8; 32];
        let send = [2u8; 32];
        let recv = [3u8; 32];
        ks.create("sess1", "alice", "bob", &root, &send, &recv)
            .await
            .unwrap();

        let view = ks.load("sess1", "alice").await.unwrap();
        assert_eq!(view.root_key, root);
        assert_eq!(view.send_key, send);
        assert_eq!(view.recv_key, recv);
        assert_eq!(view.status, "active");
    }

    #[tokio::test]
    async fn load_denies_non_party() {
        let ks = test_keystore().await;
        ks.create("sess1", "alice", "bob", &[1u8; 32], &[2u8; 32], &[3u8; 32])
            .await
            .unwrap();
        let err = ks.load("sess1", "mallory").await.unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn supersede_marks_prior_session_inactive() {
        let ks = test_keystore().await;
        ks.create("sess1", "alice", "bob", &[1u8; 32], &[2u8; 32], &[3u8; 32])
            .await
            .unwrap();
        ks.create("sess2", "alice", "bob", &[4u8; 32], &[5u8; 32], &[6u8; 32])
            .await
            .unwrap();
        ks.supersede("alice", "bob", "sess2").await.unwrap();

        let old = ks.fetch_row("sess1").await.unwrap();
        assert_eq!(old.status, "inactive");
        assert_eq!(old.status_reason.as_deref(), Some("Superseded by sess2"));

        let active = ks.find_active("alice", "bob").await.unwrap();
        assert_eq!(active.as_deref(), Some("sess2"));
    }

    #[tokio::test]
    async fn replay_state_roundtrips_through_storage() {
        let ks = test_keystore().await;
        ks.create("sess1", "alice", "bob", &[1u8; 32], &[2u8; 32], &[3u8; 32])
            .await
            .unwrap();

        let mut state = ks.load_replay_state("sess1").await.unwrap();
        assert_eq!(state.last_seq(), 0);
        state.advance_seq(1);
        state.record_nonce_hash([9u8; 32]);
        ks.save_replay_state("sess1", &state).await.unwrap();

        let reloaded = ks.load_replay_state("sess1").await.unwrap();
        assert_eq!(reloaded.last_seq(), 1);
        assert!(reloaded.has_seen_nonce_hash(&[9u8; 32]));
    }

    #[tokio::test]
    async fn rotate_discards_prior_keys() {
        let ks = test_keystore().await;
        ks.create("sess1", "alice", "bob", &[1u8; 32], &[2u8; 32], &[3u8; 32])
            .await
            .unwrap();
        ks.rotate_keys("sess1", "alice", &[7u8; 32], &[8u8; 32], &[9u8; 32])
            .await
            .unwrap();
        let view = ks.load("sess1", "alice").await.unwrap();
        assert_eq!(view.send_key, [8u8; 32]);
        assert_eq!(view.recv_key, [9u8; 32]);
    }
}
