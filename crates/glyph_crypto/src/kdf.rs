//! Key derivation (C1): HKDF-SHA-256 for session key material, PBKDF2-SHA-256
//! for password-based key-encryption keys.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

/// Production floor for PBKDF2 iterations (spec §4.1/§6).
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Set to any value to allow `pbkdf2` iteration counts below
/// [`MIN_PBKDF2_ITERATIONS`] — intended for test suites only, never for
/// production configuration.
pub const ALLOW_WEAK_PBKDF2_ENV_VAR: &str = "GLYPH_ALLOW_WEAK_PBKDF2";

/// Expand `ikm` into `output.len()` bytes of key material under `salt`/`info`.
/// `salt` may be empty — HKDF then uses an all-zero salt internally.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Convenience wrapper returning a fresh 32-byte key.
pub fn hkdf32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    hkdf(ikm, salt, info, &mut out)?;
    Ok(out)
}

/// PBKDF2-HMAC-SHA256, producing a 32-byte key-encryption key.
///
/// `iterations` below [`MIN_PBKDF2_ITERATIONS`] is rejected unless
/// [`ALLOW_WEAK_PBKDF2_ENV_VAR`] is set in the process environment — the
/// explicit escape hatch test suites use so they don't pay the production
/// KDF cost on every run.
pub fn pbkdf2(password: &[u8], salt: &[u8; 16], iterations: u32) -> Result<[u8; 32], CryptoError> {
    if iterations < MIN_PBKDF2_ITERATIONS && std::env::var_os(ALLOW_WEAK_PBKDF2_ENV_VAR).is_none()
    {
        return Err(CryptoError::KeyDerivation(format!(
            "pbkdf2 iteration count {iterations} is below the production floor of {MIN_PBKDF2_ITERATIONS}"
        )));
    }
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_is_deterministic() {
        let a = hkdf32(b"ikm", b"salt", b"info").unwrap();
        let b = hkdf32(b"ikm", b"salt", b"info").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hkdf_salt_changes_output() {
        let a = hkdf32(b"ikm", b"SEND", b"alice").unwrap();
        let b = hkdf32(b"ikm", b"SEND", b"bob").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn pbkdf2_rejects_low_iterations_without_the_escape_hatch() {
        std::env::remove_var(ALLOW_WEAK_PBKDF2_ENV_VAR);
        let salt = [0u8; 16];
        assert!(pbkdf2(b"pw", &salt, 1_000).is_err());
        assert!(pbkdf2(b"pw", &salt, MIN_PBKDF2_ITERATIONS).is_ok());
    }

    #[test]
    fn pbkdf2_is_deterministic() {
        let salt = [5u8; 16];
        let a = pbkdf2(b"pw", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        let b = pbkdf2(b"pw", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_eq!(a, b);
    }
}
