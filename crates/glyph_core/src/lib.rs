//! Glyph Secure Channel - session orchestration and configuration (C7).
//!
//! Wires the primitives (`glyph_crypto`), envelope codec and chunker
//! (`glyph_proto`), and persistence (`glyph_store`) into the two entry
//! points an embedding transport layer drives: initiating a session and
//! handling an incoming key exchange.

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::EngineConfig;
pub use error::CoreError;
pub use supervisor::{derive_session_id, KepTransport, SessionSupervisor};
