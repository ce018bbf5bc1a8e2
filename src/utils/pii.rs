// utils/pii.rs
//
// Phone numbers on ledger rows are encrypted at rest with AES-256-GCM.
// The stored form is base64(nonce || ciphertext); the nonce is random per
// encryption, so the same phone never produces the same stored value twice.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct PiiCipher {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for PiiCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiCipher").finish_non_exhaustive()
    }
}

impl PiiCipher {
    /// Build a cipher from a 32-byte master key.
    pub fn new(master_key: &[u8; 32]) -> Self {
        Self {
            key: *Key::<Aes256Gcm>::from_slice(master_key),
        }
    }

    /// Derive the master key from a hex-encoded config value.
    pub fn from_hex(hex_key: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_key).map_err(|e| format!("Invalid PII key: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "PII key must be 32 bytes".to_string())?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| format!("Encryption failed: {}", e))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, String> {
        let combined = BASE64
            .decode(stored)
            .map_err(|e| format!("Invalid ciphertext encoding: {}", e))?;
        if combined.len() <= NONCE_LEN {
            return Err("Ciphertext too short".to_string());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| format!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> PiiCipher {
        PiiCipher::new(&[7u8; 32])
    }

    #[test]
    fn test_roundtrip() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("254712345678").unwrap();
        assert_eq!(cipher.decrypt(&stored).unwrap(), "254712345678");
    }

    #[test]
    fn test_nonce_randomized() {
        let cipher = test_cipher();
        let a = cipher.encrypt("254712345678").unwrap();
        let b = cipher.encrypt("254712345678").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let stored = test_cipher().encrypt("254712345678").unwrap();
        let other = PiiCipher::new(&[8u8; 32]);
        assert!(other.decrypt(&stored).is_err());
    }

    #[test]
    fn test_from_hex_validates_length() {
        assert!(PiiCipher::from_hex("abcd").is_err());
        let key_hex = hex::encode([7u8; 32]);
        assert!(PiiCipher::from_hex(&key_hex).is_ok());
    }
}
