//! Authenticated message/file envelope (C5): build on send, validate on
//! receive. The relay server sees only this structure — `sessionId`,
//! routing ids, and opaque ciphertext.
//!
//! Decrypt enforces, in order: structural validity, freshness, ordering,
//! replay, then integrity. The first failing check wins; only integrity
//! failure reaches the AEAD primitive at all, so a tampered envelope never
//! pays for a tag check it cannot need.

use serde::{Deserialize, Serialize};

use glyph_crypto::aead;

use crate::error::ProtoError;
use crate::wire::{b64array, b64vec};

/// ±120 s, per §4.5.
pub const FRESHNESS_WINDOW_MS: i64 = 120_000;

/// Fields common to all three envelope kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeCore {
    pub session_id: String,
    pub sender: String,
    pub receiver: String,
    #[serde(with = "b64vec")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64array")]
    pub iv: [u8; 12],
    #[serde(rename = "authTag", with = "b64array")]
    pub auth_tag: [u8; 16],
    pub timestamp: i64,
    pub seq: u64,
    #[serde(with = "b64array")]
    pub nonce: [u8; 16],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetaInfo {
    pub filename: String,
    pub size: u64,
    pub mimetype: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunkInfo {
    pub chunk_index: u32,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "MSG")]
    Msg {
        #[serde(flatten)]
        core: EnvelopeCore,
    },
    #[serde(rename = "FILE_META")]
    FileMeta {
        #[serde(flatten)]
        core: EnvelopeCore,
        meta: FileMetaInfo,
    },
    #[serde(rename = "FILE_CHUNK")]
    FileChunk {
        #[serde(flatten)]
        core: EnvelopeCore,
        meta: FileChunkInfo,
    },
}

impl Envelope {
    pub fn core(&self) -> &EnvelopeCore {
        match self {
            Envelope::Msg { core } => core,
            Envelope::FileMeta { core, .. } => core,
            Envelope::FileChunk { core, .. } => core,
        }
    }
}

/// Tracks per-session ordering and the nonce-replay window. The session
/// keystore (C3) is the real owner of this state; implementations there
/// satisfy this trait so the codec never needs to know about storage.
pub trait ReplayGuard {
    fn last_seq(&self) -> u64;
    fn advance_seq(&mut self, seq: u64);
    fn has_seen_nonce_hash(&self, nonce_hash: &[u8; 32]) -> bool;
    fn record_nonce_hash(&mut self, nonce_hash: [u8; 32]);
}

/// Monotonic per-session sequence allocator used on the send path, seeded
/// from a session's `lastSeq` at load time.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: u64,
}

impl SequenceAllocator {
    pub fn seeded_from(last_seq: u64) -> Self {
        Self { next: last_seq + 1 }
    }

    pub fn next(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

/// Build a `MSG` envelope. `seq` must come from [`SequenceAllocator::next`]
/// seeded from the session's `lastSeq`.
pub fn seal_message(
    send_key: &[u8; 32],
    session_id: &str,
    sender: &str,
    receiver: &str,
    seq: u64,
    now_ms: i64,
    plaintext: &str,
) -> Result<Envelope, ProtoError> {
    let sealed = aead::seal(send_key, plaintext.as_bytes(), b"")?;
    let core = EnvelopeCore {
        session_id: session_id.to_string(),
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
        auth_tag: sealed.tag,
        timestamp: now_ms,
        seq,
        nonce: glyph_crypto::hash::random_array::<16>(),
    };
    Ok(Envelope::Msg { core })
}

/// Validate and decrypt a `MSG` envelope. On acceptance, `guard` is updated
/// with the new `lastSeq` and nonce hash; on rejection, `guard` is left
/// untouched and the specific [`ProtoError`] names the failure kind so the
/// caller can route it to the security log (C8). An exact redelivery (same
/// seq, same nonce) still fails ordering first per §4.5, but carries
/// `OrderingError { replayed: true, .. }` so callers can still log it as a
/// replay attempt rather than a plain seq mismatch.
pub fn open_message(
    recv_key: &[u8; 32],
    envelope: &Envelope,
    guard: &mut impl ReplayGuard,
    now_ms: i64,
) -> Result<String, ProtoError> {
    let core = match envelope {
        Envelope::Msg { core } => core,
        _ => return Err(ProtoError::MalformedEnvelope("expected MSG envelope".into())),
    };

    validate_freshness(core.timestamp, now_ms)?;
    let nonce_hash = glyph_crypto::hash::sha256(&core.nonce);
    let replayed = guard.has_seen_nonce_hash(&nonce_hash);
    validate_ordering(core.seq, guard.last_seq(), replayed)?;
    if replayed {
        return Err(ProtoError::ReplayError);
    }

    let plaintext = aead::open(recv_key, &core.iv, &core.ciphertext, &core.auth_tag)?;
    let text = String::from_utf8(plaintext.to_vec())
        .map_err(|e| ProtoError::MalformedEnvelope(e.to_string()))?;

    guard.advance_seq(core.seq);
    guard.record_nonce_hash(nonce_hash);
    Ok(text)
}

fn validate_freshness(timestamp: i64, now_ms: i64) -> Result<(), ProtoError> {
    if (now_ms - timestamp).abs() > FRESHNESS_WINDOW_MS {
        return Err(ProtoError::FreshnessError);
    }
    Ok(())
}

fn validate_ordering(seq: u64, last_seq: u64, replayed: bool) -> Result<(), ProtoError> {
    if seq == 0 || seq <= last_seq {
        return Err(ProtoError::OrderingError {
            seq,
            last_seq,
            replayed,
        });
    }
    Ok(())
}
