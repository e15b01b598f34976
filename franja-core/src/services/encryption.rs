//! Field encryption for secrets at rest
//!
//! Argon2id derives a 256-bit key from a passphrase and the per-installation
//! salt; AES-256-GCM seals each value under a fresh 96-bit nonce.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::domain::encryption::SALT_LEN;
use crate::domain::result::{Error, Result};
use crate::domain::{Argon2Params, SealedSecret};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A derived AES key, wiped from memory on drop
pub struct DerivedKey(Zeroizing<Vec<u8>>);

impl DerivedKey {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a new random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::Rng;
    rand::thread_rng().gen()
}

/// Derive encryption key from passphrase using Argon2id
pub fn derive_key(passphrase: &str, salt: &[u8], params: &Argon2Params) -> Result<DerivedKey> {
    if params.hash_len as usize != KEY_LEN {
        return Err(Error::Decryption(format!(
            "Unsupported key length: {}",
            params.hash_len
        )));
    }

    let argon2_params = argon2::Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::Decryption(format!("Failed to create argon2 params: {:?}", e)))?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::Decryption(format!("Failed to derive key: {:?}", e)))?;

    Ok(DerivedKey(key))
}

/// Encrypt a string; every call uses a new nonce
pub fn seal(plaintext: &str, key: &DerivedKey) -> Result<SealedSecret> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::persistence(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::persistence(format!("Encryption failed: {}", e)))?;

    Ok(SealedSecret {
        nonce: STANDARD.encode(nonce_bytes),
        ciphertext: STANDARD.encode(ciphertext),
    })
}

/// Decrypt a sealed string
///
/// Any tampering, wrong key or malformed encoding yields [`Error::Decryption`].
pub fn open(sealed: &SealedSecret, key: &DerivedKey) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Decryption(format!("Failed to create cipher: {}", e)))?;

    let nonce_bytes = STANDARD
        .decode(&sealed.nonce)
        .map_err(|e| Error::Decryption(format!("Invalid nonce encoding: {}", e)))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Decryption(format!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_LEN,
            nonce_bytes.len()
        )));
    }
    let ciphertext = STANDARD
        .decode(&sealed.ciphertext)
        .map_err(|e| Error::Decryption(format!("Invalid ciphertext encoding: {}", e)))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| {
                Error::Decryption("invalid key or corrupted data".to_string())
            })?,
    );

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| Error::Decryption("decrypted value is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> Argon2Params {
        Argon2Params {
            time_cost: 1,
            memory_cost: 1024,
            parallelism: 1,
            hash_len: 32,
        }
    }

    fn test_key(passphrase: &str) -> DerivedKey {
        derive_key(passphrase, &[7u8; SALT_LEN], &fast_params()).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let key = test_key("passphrase");
        let sealed = seal("hunter2", &key).unwrap();
        assert_ne!(sealed.ciphertext, "hunter2");
        assert_eq!(open(&sealed, &key).unwrap(), "hunter2");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = test_key("passphrase");
        let a = seal("same", &key).unwrap();
        let b = seal("same", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal("secret", &test_key("one")).unwrap();
        assert!(matches!(
            open(&sealed, &test_key("two")),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key("passphrase");
        let mut sealed = seal("secret", &key).unwrap();
        let mut bytes = STANDARD.decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        sealed.ciphertext = STANDARD.encode(bytes);
        assert!(matches!(open(&sealed, &key), Err(Error::Decryption(_))));

        sealed.nonce = "not base64!".to_string();
        assert!(matches!(open(&sealed, &key), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_salt_is_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
