//! Engine configuration (§6). All six knobs the spec names as external
//! configuration live here with their documented production defaults.

use glyph_crypto::kdf::MIN_PBKDF2_ITERATIONS;
use glyph_proto::chunker::{CHUNK_SIZE_BYTES, MAX_FILE_SIZE_BYTES};
use glyph_proto::envelope::FRESHNESS_WINDOW_MS;
use glyph_store::keystore::NONCE_WINDOW;

/// Default KEP round-trip timeout (§5).
pub const DEFAULT_KEP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub pbkdf2_iterations: u32,
    pub chunk_size_bytes: usize,
    pub max_file_size_bytes: u64,
    pub freshness_window_ms: i64,
    pub kep_timeout_ms: u64,
    pub nonce_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            chunk_size_bytes: CHUNK_SIZE_BYTES,
            max_file_size_bytes: MAX_FILE_SIZE_BYTES,
            freshness_window_ms: FRESHNESS_WINDOW_MS,
            kep_timeout_ms: DEFAULT_KEP_TIMEOUT_MS,
            nonce_window: NONCE_WINDOW,
        }
    }
}

impl EngineConfig {
    /// A configuration with a drastically lowered PBKDF2 iteration count,
    /// so test suites don't pay the production KDF cost on every run.
    ///
    /// This only has an effect where [`glyph_crypto::kdf::pbkdf2`] sees
    /// [`glyph_crypto::kdf::ALLOW_WEAK_PBKDF2_ENV_VAR`] set in the process
    /// environment (§4.1's "environment flag set explicitly for tests") —
    /// callers that forget to set it get the production floor enforced
    /// anyway, never a silently-weak KEK.
    pub fn insecure_for_tests() -> Self {
        Self {
            pbkdf2_iterations: 1_000,
            ..Self::default()
        }
    }
}
