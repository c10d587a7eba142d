//! Identity keys (C1/C2): a long-lived ECDSA P-256 signing key that anchors
//! a user's identity across sessions.
//!
//! There is no device-certificate chain and no multi-device model here —
//! one identity keypair per user, generated once and persisted (sealed
//! under a password-derived KEK) by the identity store.

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::PublicKey;
use rand_core::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::jwk::PublicJwk;

/// A long-lived identity keypair. The private half never leaves this type
/// except through [`IdentityKeyPair::private_key_bytes`], used only when
/// sealing the key for storage.
#[derive(Debug, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    verifying_key: VerifyingKey,
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = *signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }

    /// Reconstruct from a raw 32-byte scalar, e.g. after unsealing from the
    /// identity store.
    pub fn from_private_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let verifying_key = *signing_key.verifying_key();
        Ok(Self {
            verifying_key,
            signing_key,
        })
    }

    /// The raw 32-byte scalar, for sealing into storage. Caller is
    /// responsible for zeroizing the returned buffer once it has been
    /// wrapped under a KEK.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk::from_p256(&PublicKey::from(self.verifying_key))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Sign an arbitrary message (callers pass canonical bytes, e.g. a
    /// [`PublicJwk::canonical_bytes`] ephemeral key during the KEP).
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Verify `signature` over `message` under the given public key.
pub fn verify(public: &PublicJwk, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let pk = public.to_p256()?;
    let verifying_key = VerifyingKey::from(pk);
    let sig = Signature::from_slice(signature).map_err(|_| CryptoError::SignatureError)?;
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::SignatureError)
}

/// Scrub a raw private-key buffer in place once it has been sealed or is no
/// longer needed in plaintext form.
pub fn scrub(bytes: &mut [u8; 32]) {
    bytes.zeroize();
}
