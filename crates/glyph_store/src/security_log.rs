//! Security Log Sink (C8): append-only record of attack-indicator events,
//! with optimistic-marking batch upload to the relay.
//!
//! Never record plaintext, key, nonce, or ciphertext bytes here — only
//! opaque identifiers, counters, and reason codes.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::SecurityLogRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEvent {
    ReplayAttempt,
    InvalidSignature,
    DecryptionError,
    KepError,
    TimestampFailure,
    SeqMismatch,
    MessageDropped,
    MitmSuspected,
}

impl SecurityEvent {
    fn as_str(&self) -> &'static str {
        match self {
            SecurityEvent::ReplayAttempt => "replay_attempt",
            SecurityEvent::InvalidSignature => "invalid_signature",
            SecurityEvent::DecryptionError => "decryption_error",
            SecurityEvent::KepError => "kep_error",
            SecurityEvent::TimestampFailure => "timestamp_failure",
            SecurityEvent::SeqMismatch => "seq_mismatch",
            SecurityEvent::MessageDropped => "message_dropped",
            SecurityEvent::MitmSuspected => "mitm_suspected",
        }
    }
}

#[derive(Clone)]
pub struct SecurityLog {
    pool: SqlitePool,
}

impl SecurityLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        event: SecurityEvent,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = metadata.map(|m| m.to_string());
        sqlx::query(
            "INSERT INTO security_log (id, occurred_at, user_id, session_id, event_type, metadata, synced)
             VALUES (?, datetime('now'), ?, ?, ?, ?, 0)",
        )
        .bind(id)
        .bind(user_id)
        .bind(session_id)
        .bind(event.as_str())
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Events not yet marked `synced`, oldest first, for a batch upload.
    pub async fn pending_upload(&self, limit: i64) -> Result<Vec<SecurityLogRow>, StoreError> {
        let rows = sqlx::query_as::<_, SecurityLogRow>(
            "SELECT * FROM security_log WHERE synced = 0 ORDER BY occurred_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark a batch of events `synced = true`. Callers invoke this only
    /// after the relay has acknowledged receipt — marking is optimistic on
    /// the relay's behalf, never on the local writer's.
    pub async fn mark_synced(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE security_log SET synced = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_log() -> SecurityLog {
        let pool = SqlitePoolOptions::new()
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SecurityLog::new(pool)
    }

    #[tokio::test]
    async fn record_and_fetch_pending() {
        let log = test_log().await;
        log.record("alice", Some("sess1"), SecurityEvent::ReplayAttempt, None)
            .await
            .unwrap();
        let pending = log.pending_upload(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type, "replay_attempt");
        assert!(!pending[0].synced);
    }

    #[tokio::test]
    async fn mark_synced_excludes_from_pending() {
        let log = test_log().await;
        log.record("alice", None, SecurityEvent::InvalidSignature, None)
            .await
            .unwrap();
        let pending = log.pending_upload(10).await.unwrap();
        let ids: Vec<String> = pending.iter().map(|r| r.id.clone()).collect();
        log.mark_synced(&ids).await.unwrap();

        let pending_after = log.pending_upload(10).await.unwrap();
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn metadata_never_carries_raw_key_material_by_contract() {
        // Contract test: metadata is opaque JSON the caller controls; this
        // asserts the sink itself performs no redaction-defeating transform
        // such as re-serializing binary fields back in.
        let log = test_log().await;
        let metadata = serde_json::json!({"seq_expected": 5, "seq_received": 3});
        log.record("alice", Some("sess1"), SecurityEvent::SeqMismatch, Some(metadata.clone()))
            .await
            .unwrap();
        let pending = log.pending_upload(10).await.unwrap();
        let stored: serde_json::Value =
            serde_json::from_str(pending[0].metadata.as_ref().unwrap()).unwrap();
        assert_eq!(stored, metadata);
    }
}
