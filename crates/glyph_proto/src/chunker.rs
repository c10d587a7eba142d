//! File Chunker (C6): split a byte source into fixed-size authenticated
//! chunks on send, verify completeness and reassemble on receive.
//!
//! `chunkSize` is frozen at compile time so receivers never need to
//! negotiate it with a sender.

use serde::{Deserialize, Serialize};

use glyph_crypto::aead;

use crate::envelope::{Envelope, EnvelopeCore, FileChunkInfo, FileMetaInfo};
use crate::error::ProtoError;

/// Fixed chunk size, within the spec's 64 KiB–256 KiB range.
pub const CHUNK_SIZE_BYTES: usize = 128 * 1024;

/// Maximum accepted file size.
pub const MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// A byte source the chunker reads from without ever holding the whole
/// file in memory at once.
pub trait ByteSource {
    fn size(&self) -> u64;
    fn slice(&self, offset: u64, length: usize) -> Result<Vec<u8>, ProtoError>;
}

/// An in-memory byte source, for callers that already have the file
/// loaded (small files, tests).
pub struct MemorySource<'a> {
    bytes: &'a [u8],
}

impl<'a> MemorySource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> ByteSource for MemorySource<'a> {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn slice(&self, offset: u64, length: usize) -> Result<Vec<u8>, ProtoError> {
        let start = offset as usize;
        let end = (start + length).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }
}

/// Reported after each chunk is encrypted/decrypted.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub chunks_done: u32,
    pub total_chunks: u32,
    pub bytes_per_sec: f64,
    pub eta_sec: f64,
}

/// A fully reassembled file, produced by [`reassemble_file`].
#[derive(Debug, Clone)]
pub struct DecryptedFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
}

fn meta_plaintext(meta: &FileMetaInfo) -> Result<Vec<u8>, ProtoError> {
    Ok(serde_json::to_vec(meta)?)
}

/// Encrypt `source` into one `FILE_META` envelope followed by
/// `totalChunks` `FILE_CHUNK` envelopes, invoking `on_progress` after each
/// chunk.
#[allow(clippy::too_many_arguments)]
pub fn encrypt_file(
    send_key: &[u8; 32],
    session_id: &str,
    sender: &str,
    receiver: &str,
    filename: &str,
    mimetype: &str,
    source: &dyn ByteSource,
    seq_start: u64,
    now_ms: i64,
    mut on_progress: impl FnMut(ChunkProgress),
) -> Result<Vec<Envelope>, ProtoError> {
    let size = source.size();
    if size > MAX_FILE_SIZE_BYTES {
        return Err(ProtoError::FileTooLarge {
            size,
            max: MAX_FILE_SIZE_BYTES,
        });
    }

    let total_chunks = size.div_ceil(CHUNK_SIZE_BYTES as u64) as u32;
    let total_chunks = total_chunks.max(1);

    let meta = FileMetaInfo {
        filename: filename.to_string(),
        size,
        mimetype: mimetype.to_string(),
        total_chunks,
    };
    let meta_sealed = aead::seal(send_key, &meta_plaintext(&meta)?, b"")?;
    let meta_core = EnvelopeCore {
        session_id: session_id.to_string(),
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        ciphertext: meta_sealed.ciphertext,
        iv: meta_sealed.iv,
        auth_tag: meta_sealed.tag,
        timestamp: now_ms,
        seq: seq_start,
        nonce: glyph_crypto::hash::random_array::<16>(),
    };

    let mut envelopes = Vec::with_capacity(total_chunks as usize + 1);
    envelopes.push(Envelope::FileMeta {
        core: meta_core,
        meta,
    });

    let start = std::time::Instant::now();
    for chunk_index in 0..total_chunks {
        let offset = chunk_index as u64 * CHUNK_SIZE_BYTES as u64;
        let remaining = size - offset;
        let len = remaining.min(CHUNK_SIZE_BYTES as u64) as usize;
        let plaintext = source.slice(offset, len)?;

        let sealed = aead::seal(send_key, &plaintext, b"")?;
        let core = EnvelopeCore {
            session_id: session_id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.tag,
            timestamp: now_ms,
            seq: seq_start + 1 + chunk_index as u64,
            nonce: glyph_crypto::hash::random_array::<16>(),
        };
        envelopes.push(Envelope::FileChunk {
            core,
            meta: FileChunkInfo {
                chunk_index,
                total_chunks,
            },
        });

        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let bytes_done = (offset + len as u64) as f64;
        let bytes_per_sec = bytes_done / elapsed;
        let remaining_bytes = (size as f64 - bytes_done).max(0.0);
        on_progress(ChunkProgress {
            chunks_done: chunk_index + 1,
            total_chunks,
            bytes_per_sec,
            eta_sec: if bytes_per_sec > 0.0 {
                remaining_bytes / bytes_per_sec
            } else {
                0.0
            },
        });
    }

    Ok(envelopes)
}

/// Decrypt and reassemble a `FILE_META` + `FILE_CHUNK` set. `envelopes`
/// need not be pre-sorted; chunks are sorted by `chunkIndex` internally.
pub fn reassemble_file(recv_key: &[u8; 32], envelopes: &[Envelope]) -> Result<DecryptedFile, ProtoError> {
    let meta_env = envelopes
        .iter()
        .find_map(|e| match e {
            Envelope::FileMeta { core, meta } => Some((core, meta)),
            _ => None,
        })
        .ok_or_else(|| ProtoError::MalformedEnvelope("missing FILE_META envelope".into()))?;

    let (meta_core, _wire_meta) = meta_env;
    let meta_plain = aead::open(
        recv_key,
        &meta_core.iv,
        &meta_core.ciphertext,
        &meta_core.auth_tag,
    )?;
    let meta: FileMetaInfo = serde_json::from_slice(&meta_plain)?;

    let mut chunks: Vec<(&EnvelopeCore, &FileChunkInfo)> = envelopes
        .iter()
        .filter_map(|e| match e {
            Envelope::FileChunk { core, meta } => Some((core, meta)),
            _ => None,
        })
        .collect();
    chunks.sort_by_key(|(_, m)| m.chunk_index);

    if chunks.len() as u32 != meta.total_chunks {
        return Err(ProtoError::MissingChunks {
            expected: meta.total_chunks,
            received: chunks.len() as u32,
        });
    }
    for (i, (_, m)) in chunks.iter().enumerate() {
        if m.chunk_index != i as u32 || m.total_chunks != meta.total_chunks {
            return Err(ProtoError::IndexMismatch);
        }
    }

    let mut bytes = Vec::with_capacity(meta.size as usize);
    for (core, _) in &chunks {
        let plaintext = aead::open(recv_key, &core.iv, &core.ciphertext, &core.auth_tag)?;
        bytes.extend_from_slice(&plaintext);
    }

    Ok(DecryptedFile {
        bytes,
        filename: meta.filename,
        mimetype: meta.mimetype,
        size: meta.size,
    })
}
