//! Key Exchange Protocol (C4): two-message mutually-authenticated ECDH.
//!
//! Wire message shapes live here rather than in the protocol crate because
//! they are transient (never stored, never an envelope) and exist only to
//! carry the values C1/C2 operate on directly — see `glyph_proto::envelope`
//! for the persisted, session-carrying wire format.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::jwk::PublicJwk;

type HmacSha256 = Hmac<Sha256>;

const CONFIRM_PREFIX: &[u8] = b"CONFIRM:";

/// The three keys produced by one successful KEP exchange. `rootKey` is
/// kept only long enough to compute/verify key confirmation and is not
/// part of the installed session state.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    pub root_key: [u8; 32],
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
}

/// Derive `(rootKey, sendKey, recvKey)` from a raw ECDH shared secret.
///
/// `local_user_id` / `peer_user_id` must be supplied from each side's own
/// point of view: the symmetry law (local `sendKey` == peer `recvKey`)
/// falls out of both sides using `info=senderId` under the same `"SEND"`
/// salt.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    session_id: &str,
    local_user_id: &str,
    peer_user_id: &str,
) -> Result<SessionKeys, CryptoError> {
    let root_key = crate::kdf::hkdf32(shared_secret, b"ROOT", session_id.as_bytes())?;
    let send_key = crate::kdf::hkdf32(&root_key, b"SEND", local_user_id.as_bytes())?;
    let recv_key = crate::kdf::hkdf32(&root_key, b"SEND", peer_user_id.as_bytes())?;
    Ok(SessionKeys {
        root_key,
        send_key,
        recv_key,
    })
}

/// `HMAC-SHA-256(rootKey, "CONFIRM:" || initiatorUserId)`.
pub fn key_confirmation(root_key: &[u8; 32], initiator_user_id: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(root_key).expect("HMAC accepts any key length");
    mac.update(CONFIRM_PREFIX);
    mac.update(initiator_user_id.as_bytes());
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&tag);
    out
}

/// Verify a `keyConfirmation` tag in constant time.
pub fn verify_key_confirmation(
    root_key: &[u8; 32],
    initiator_user_id: &str,
    tag: &[u8],
) -> Result<(), CryptoError> {
    let mut mac = HmacSha256::new_from_slice(root_key).expect("HMAC accepts any key length");
    mac.update(CONFIRM_PREFIX);
    mac.update(initiator_user_id.as_bytes());
    mac.verify_slice(tag).map_err(|_| CryptoError::SignatureError)
}

/// `KEP_INIT` — sent by the initiator to start a key exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KepInit {
    pub from: String,
    pub to: String,
    pub session_id: String,
    pub eph_pub: PublicJwk,
    #[serde(with = "b64bytes")]
    pub signature: Vec<u8>,
    pub timestamp: i64,
    #[serde(with = "b64bytes")]
    pub nonce: Vec<u8>,
    pub seq: u64,
}

/// `KEP_RESPONSE` — sent by the responder, completing the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KepResponse {
    pub from: String,
    pub to: String,
    pub session_id: String,
    pub eph_pub: PublicJwk,
    #[serde(with = "b64bytes")]
    pub signature: Vec<u8>,
    pub timestamp: i64,
    #[serde(with = "b64bytes")]
    pub nonce: Vec<u8>,
    pub seq: u64,
    #[serde(with = "b64bytes")]
    pub key_confirmation: Vec<u8>,
}

/// Bytes the initiator signs/the responder verifies over `eph_pub`: the
/// canonical JWK bytes, nothing else appended.
pub fn signing_bytes(eph_pub: &PublicJwk) -> Vec<u8> {
    eph_pub.canonical_bytes()
}

mod b64bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
