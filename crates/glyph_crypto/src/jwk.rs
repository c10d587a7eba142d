//! Canonical EC P-256 public-key JWK.
//!
//! The wire representation is a closed record of exactly four fields, in
//! exactly this order: `kty`, `crv`, `x`, `y`. This is the only
//! representation accepted for signing or verifying ephemeral and identity
//! keys (see KEP, §4.4). Extra fields on a parsed JWK (`d`, `key_ops`,
//! `alg`, `ext`, ...) are silently dropped by serde's default behavior;
//! a missing required field is a structural error.
//!
//! `canonical_bytes` is what gets signed and what gets verified — it MUST
//! match byte-for-byte between signer and verifier, so it is produced by
//! serializing this struct directly (never through a `serde_json::Value`,
//! whose map type does not guarantee field order).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl PublicJwk {
    pub fn from_p256(pk: &PublicKey) -> Self {
        let pt = pk.to_encoded_point(false);
        let x = pt.x().expect("uncompressed point has x");
        let y = pt.y().expect("uncompressed point has y");
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }
    }

    pub fn to_p256(&self) -> Result<PublicKey, CryptoError> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported key type/curve: {}/{}",
                self.kty, self.crv
            )));
        }
        let x = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(CryptoError::Base64Decode)?;
        let y = URL_SAFE_NO_PAD
            .decode(&self.y)
            .map_err(CryptoError::Base64Decode)?;
        if x.len() != 32 || y.len() != 32 {
            return Err(CryptoError::InvalidKey(
                "P-256 coordinate must be 32 bytes".into(),
            ));
        }
        let encoded = EncodedPoint::from_affine_coordinates(
            x.as_slice().into(),
            y.as_slice().into(),
            false,
        );
        Option::from(PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| CryptoError::InvalidKey("point not on P-256 curve".into()))
    }

    /// The exact bytes that are signed/verified: compact JSON, field order
    /// `kty, crv, x, y`, no whitespace.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("PublicJwk always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn roundtrip_has_exactly_four_fields_in_order() {
        let sk = SigningKey::random(&mut OsRng);
        let pk = PublicKey::from(sk.verifying_key());
        let jwk = PublicJwk::from_p256(&pk);
        let bytes = jwk.canonical_bytes();
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with(r#"{"kty":"EC","crv":"P-256","x":"#));
        let back = jwk.to_p256().unwrap();
        assert_eq!(pk, back);
    }

    #[test]
    fn drops_unknown_fields_rejects_missing() {
        let json = r#"{"kty":"EC","crv":"P-256","x":"AAAA","y":"AAAA","d":"secret","ext":true}"#;
        let jwk: PublicJwk = serde_json::from_str(json).unwrap();
        assert_eq!(jwk.kty, "EC");

        let missing = r#"{"kty":"EC","crv":"P-256","x":"AAAA"}"#;
        assert!(serde_json::from_str::<PublicJwk>(missing).is_err());
    }

    #[test]
    fn rejects_non_p256_curve() {
        let jwk = PublicJwk {
            kty: "EC".into(),
            crv: "P-384".into(),
            x: URL_SAFE_NO_PAD.encode([0u8; 32]),
            y: URL_SAFE_NO_PAD.encode([0u8; 32]),
        };
        assert!(jwk.to_p256().is_err());
    }
}
