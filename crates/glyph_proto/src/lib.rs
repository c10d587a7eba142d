//! glyph_proto — the authenticated envelope codec and file chunker for the
//! Glyph secure channel engine.
//!
//! # Modules
//! - `envelope` — `MSG`/`FILE_META`/`FILE_CHUNK` envelope codec (C5)
//! - `chunker`  — fixed-size chunked file encryption and reassembly (C6)
//! - `wire`     — base64 (de)serialization helpers shared by both
//! - `error`    — unified error type

pub mod chunker;
pub mod envelope;
pub mod error;
pub mod wire;

pub use envelope::{Envelope, EnvelopeCore, ReplayGuard, SequenceAllocator};
pub use error::ProtoError;
