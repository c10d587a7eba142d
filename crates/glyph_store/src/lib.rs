//! glyph_store — encrypted local persistence for the Glyph secure channel
//! engine: the identity store (C2), session keystore (C3), and security
//! log sink (C8).
//!
//! # Encryption strategy
//! SQLite does not natively encrypt. Sensitive columns (identity private
//! keys, session symmetric keys) are stored as AES-256-GCM ciphertext,
//! base64-encoded, sealed under a KEK held only in the process-wide
//! [`kek_cache::KekCache`]. Non-sensitive metadata (timestamps, user ids,
//! sequence numbers) is stored in plaintext to allow efficient queries.
//!
//! # Migration
//! SQLx migrations in `migrations/` are run on first open.

pub mod db;
pub mod error;
pub mod identity_store;
pub mod kek_cache;
pub mod keystore;
pub mod migrations;
pub mod models;
pub mod security_log;

pub use db::Store;
pub use error::StoreError;
pub use kek_cache::KekCache;
