//! Identity Store (C2): generate, seal, and unseal a user's long-term
//! ECDSA identity keypair.

use base64::{engine::general_purpose::STANDARD, Engine};
use sqlx::SqlitePool;

use glyph_crypto::identity::IdentityKeyPair;
use glyph_crypto::jwk::PublicJwk;
use glyph_crypto::{aead, hash, kdf};

use crate::error::StoreError;
use crate::models::IdentityRow;

/// Fixed inputs used to run a decoy PBKDF2 + AEAD-open when no identity
/// record exists for the requested user, so `load` costs the same whether
/// the user id is unknown or the password is wrong (§4.2).
const DUMMY_SALT: [u8; 16] = [0x42; 16];
const DUMMY_IV: [u8; 12] = [0x24; 12];
const DUMMY_TAG: [u8; 16] = [0x99; 16];
const DUMMY_CIPHERTEXT: [u8; 32] = [0x11; 32];

pub struct IdentityStore {
    pool: SqlitePool,
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a fresh ECDSA P-256 identity for `user_id`, sealing the
    /// private key under a KEK derived from `password` and a fresh
    /// 16-byte salt. Returns the public JWK to publish to the relay's
    /// key directory.
    pub async fn generate(
        &self,
        user_id: &str,
        password: &[u8],
        pbkdf2_iterations: u32,
    ) -> Result<PublicJwk, StoreError> {
        let identity = IdentityKeyPair::generate();
        let public_jwk = identity.public_jwk();

        let salt: [u8; 16] = hash::random_array::<16>();
        let kek = kdf::pbkdf2(password, &salt, pbkdf2_iterations)?;
        let mut private_bytes = identity.private_key_bytes();
        let sealed = aead::seal(&kek, &private_bytes, b"")?;
        glyph_crypto::identity::scrub(&mut private_bytes);

        sqlx::query(
            "INSERT INTO identities (user_id, sealed_private_key, salt, iv, tag, pbkdf2_iterations, created_at)
             VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(user_id)
        .bind(STANDARD.encode(&sealed.ciphertext))
        .bind(STANDARD.encode(salt))
        .bind(STANDARD.encode(sealed.iv))
        .bind(STANDARD.encode(sealed.tag))
        .bind(pbkdf2_iterations as i64)
        .execute(&self.pool)
        .await?;

        Ok(public_jwk)
    }

    /// Unseal the identity private key for `user_id`. Fails with
    /// `WrongPasswordError` on AEAD tag mismatch and `NotFoundError` when
    /// no record exists. A missing record still runs a PBKDF2 derivation
    /// and an AEAD-open attempt against fixed decoy inputs before
    /// returning, so the two failure causes cost the same and cannot be
    /// told apart by timing (§4.2).
    pub async fn load(&self, user_id: &str, password: &[u8]) -> Result<IdentityKeyPair, StoreError> {
        let row = self.fetch_row(user_id).await?;

        let (salt, iv, tag, ciphertext, pbkdf2_iterations) = match &row {
            Some(row) => {
                let salt = decode_fixed::<16>(&row.salt)?;
                let iv = decode_fixed::<12>(&row.iv)?;
                let tag = decode_fixed::<16>(&row.tag)?;
                let ciphertext = STANDARD
                    .decode(&row.sealed_private_key)
                    .map_err(glyph_crypto::CryptoError::Base64Decode)?;
                (salt, iv, tag, ciphertext, row.pbkdf2_iterations as u32)
            }
            None => (
                DUMMY_SALT,
                DUMMY_IV,
                DUMMY_TAG,
                DUMMY_CIPHERTEXT.to_vec(),
                kdf::MIN_PBKDF2_ITERATIONS,
            ),
        };

        let kek = kdf::pbkdf2(password, &salt, pbkdf2_iterations)?;
        let opened = aead::open(&kek, &iv, &ciphertext, &tag);

        if row.is_none() {
            return Err(StoreError::NotFoundError(format!("identity for {user_id}")));
        }

        let plaintext = opened.map_err(|_| StoreError::WrongPasswordError)?;
        if plaintext.len() != 32 {
            return Err(StoreError::WrongPasswordError);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&plaintext);
        let identity = IdentityKeyPair::from_private_bytes(&bytes)?;
        glyph_crypto::identity::scrub(&mut bytes);
        Ok(identity)
    }

    pub async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM identities WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn delete(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM identities WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_row(&self, user_id: &str) -> Result<Option<IdentityRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], StoreError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(glyph_crypto::CryptoError::Base64Decode)?;
    if bytes.len() != N {
        return Err(StoreError::Crypto(glyph_crypto::CryptoError::InvalidKey(
            format!("expected {N} bytes, got {}", bytes.len()),
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
