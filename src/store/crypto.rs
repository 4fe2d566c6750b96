//! AEAD and key-derivation layer for the encrypted store.
//!
//! AES-256-GCM with a 16-byte IV and detached 16-byte authentication tag,
//! keyed by a PBKDF2-HMAC-SHA256 derivation from the master passphrase.
//! This module owns no policy: the store decides when keys are derived and
//! what happens on failure.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, KeyInit};
use hmac::Hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Key length in bytes (256 bits for AES-256).
pub const KEY_LENGTH: usize = 32;

/// IV length in bytes. The store format uses 128-bit IVs.
pub const IV_LENGTH: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// Salt length in bytes (256 bits), generated once per store.
pub const SALT_LENGTH: usize = 32;

/// AES-256-GCM parameterized with the store's 16-byte nonce.
type StoreCipher = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: authentication tag mismatch or corrupted data")]
    Decrypt,

    #[error("invalid {field} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The session master key. Derived once per process from the passphrase
/// and the store salt; never persisted.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LENGTH]);

impl MasterKey {
    /// Derive a master key via PBKDF2-HMAC-SHA256.
    pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Result<Self, CryptoError> {
        if salt.len() != SALT_LENGTH {
            return Err(CryptoError::InvalidLength {
                field: "salt",
                expected: SALT_LENGTH,
                actual: salt.len(),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), salt, iterations, &mut key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

// Key material must never leak through debug formatting.
impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Output of one encryption call: ciphertext plus the IV and detached tag
/// that must be stored alongside it.
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LENGTH],
    pub auth_tag: [u8; TAG_LENGTH],
}

/// Generate a fresh random store salt.
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// A new IV is drawn on every call; IVs are never reused under the same
/// key.
pub fn encrypt(key: &MasterKey, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher =
        StoreCipher::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    let nonce = GenericArray::from_slice(&iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", &mut buffer)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut auth_tag = [0u8; TAG_LENGTH];
    auth_tag.copy_from_slice(&tag);

    Ok(EncryptedPayload {
        ciphertext: buffer,
        iv,
        auth_tag,
    })
}

/// Decrypt and verify one record's payload.
///
/// Any tampering with the ciphertext, IV, or tag fails verification and is
/// surfaced as `CryptoError::Decrypt`; a wrong value is never returned.
pub fn decrypt(
    key: &MasterKey,
    ciphertext: &[u8],
    iv: &[u8],
    auth_tag: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LENGTH {
        return Err(CryptoError::InvalidLength {
            field: "iv",
            expected: IV_LENGTH,
            actual: iv.len(),
        });
    }
    if auth_tag.len() != TAG_LENGTH {
        return Err(CryptoError::InvalidLength {
            field: "auth_tag",
            expected: TAG_LENGTH,
            actual: auth_tag.len(),
        });
    }

    let cipher =
        StoreCipher::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let nonce = GenericArray::from_slice(iv);
    let tag = GenericArray::from_slice(auth_tag);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::derive("unit-test-passphrase", &[7u8; SALT_LENGTH], 600_000).unwrap()
    }

    #[test]
    fn derive_is_deterministic_for_same_inputs() {
        let salt = [42u8; SALT_LENGTH];
        let a = MasterKey::derive("some long passphrase", &salt, 600_000).unwrap();
        let b = MasterKey::derive("some long passphrase", &salt, 600_000).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derive_differs_across_salts_and_passphrases() {
        let a = MasterKey::derive("some long passphrase", &[1u8; SALT_LENGTH], 600_000).unwrap();
        let b = MasterKey::derive("some long passphrase", &[2u8; SALT_LENGTH], 600_000).unwrap();
        let c = MasterKey::derive("another passphrase!!", &[1u8; SALT_LENGTH], 600_000).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn derive_rejects_wrong_salt_length() {
        let result = MasterKey::derive("some long passphrase", &[0u8; 16], 600_000);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidLength { field: "salt", .. })
        ));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"sk-abcdefghijklmnopqrstuvwxyz0123456789";

        let payload = encrypt(&key, plaintext).unwrap();
        assert_eq!(payload.iv.len(), IV_LENGTH);
        assert_eq!(payload.auth_tag.len(), TAG_LENGTH);

        let decrypted = decrypt(&key, &payload.ciphertext, &payload.iv, &payload.auth_tag).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn roundtrip_arbitrary_byte_values() {
        let key = test_key();
        for len in [1usize, 16, 255, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let payload = encrypt(&key, &plaintext).unwrap();
            let decrypted =
                decrypt(&key, &payload.ciphertext, &payload.iv, &payload.auth_tag).unwrap();
            assert_eq!(decrypted, plaintext, "roundtrip failed at len {len}");
        }
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let key = test_key();
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn ciphertext_bit_flip_is_detected() {
        let key = test_key();
        let payload = encrypt(&key, b"tamper target").unwrap();

        for bit in 0..8 {
            let mut tampered = payload.ciphertext.clone();
            tampered[0] ^= 1 << bit;
            let result = decrypt(&key, &tampered, &payload.iv, &payload.auth_tag);
            assert!(matches!(result, Err(CryptoError::Decrypt)));
        }
    }

    #[test]
    fn auth_tag_bit_flip_is_detected() {
        let key = test_key();
        let payload = encrypt(&key, b"tamper target").unwrap();

        let mut tag = payload.auth_tag;
        tag[TAG_LENGTH - 1] ^= 0x01;
        let result = decrypt(&key, &payload.ciphertext, &payload.iv, &tag);
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = test_key();
        let other = MasterKey::derive("a different passphrase", &[7u8; SALT_LENGTH], 600_000)
            .unwrap();
        let payload = encrypt(&key, b"secret").unwrap();
        assert!(decrypt(&other, &payload.ciphertext, &payload.iv, &payload.auth_tag).is_err());
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let key = test_key();
        assert_eq!(format!("{key:?}"), "MasterKey(..)");
    }
}
