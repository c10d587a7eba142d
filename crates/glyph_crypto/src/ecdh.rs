//! Ephemeral ECDH P-256 keypairs (C1), used once per KEP and then dropped.

use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::jwk::PublicJwk;

/// An ephemeral ECDH keypair. Owned for the lifetime of one KEP exchange;
/// the secret half is zeroized on drop whether the exchange succeeded or
/// failed.
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    #[zeroize(skip)]
    public: PublicKey,
    secret: SecretKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { public, secret }
    }

    pub fn public_jwk(&self) -> PublicJwk {
        PublicJwk::from_p256(&self.public)
    }

    /// Compute the raw ECDH shared secret (the x-coordinate of the shared
    /// point) against a peer's ephemeral public key.
    pub fn derive_shared_secret(&self, peer_public: &PublicJwk) -> Result<[u8; 32], CryptoError> {
        let peer_pk = peer_public.to_p256()?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer_pk.as_affine());
        let bytes = shared.raw_secret_bytes();
        if bytes.len() != 32 {
            return Err(CryptoError::KeyDerivation(
                "unexpected ECDH shared-secret length".into(),
            ));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public.to_encoded_point(false))
            .finish_non_exhaustive()
    }
}
