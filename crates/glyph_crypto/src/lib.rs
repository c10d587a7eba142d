//! glyph_crypto — cryptographic primitives, identity keys, and the Key
//! Exchange Protocol for the Glyph secure channel engine.
//!
//! # Design principles
//! - No custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `aead`     — AES-256-GCM seal/open and key-wrapping helpers
//! - `ecdh`     — ephemeral ECDH P-256 keypairs used once per KEP
//! - `error`    — unified error type
//! - `hash`     — SHA-256 and CSRNG byte generation
//! - `identity` — long-term ECDSA P-256 identity keypairs
//! - `jwk`      — canonical four-field EC public-key JWK
//! - `kdf`      — HKDF-SHA-256 / PBKDF2-SHA-256 key derivation
//! - `kep`      — the two-message authenticated Key Exchange Protocol

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod hash;
pub mod identity;
pub mod jwk;
pub mod kdf;
pub mod kep;

pub use error::CryptoError;
