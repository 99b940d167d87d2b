//! Credential encryption using AES-256-GCM.
//!
//! Oracle passwords are stored as `base64(nonce || ciphertext)` with a fresh
//! 12-byte nonce per encryption. The 32-byte key lives in a separate file that
//! is created on first start.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts stored Oracle credentials.
pub struct KeyManager {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("cipher", &"<redacted>")
            .finish()
    }
}

impl KeyManager {
    /// Load the key at `key_path`, generating it when the file is missing.
    pub fn new(key_path: &Path) -> Result<Self> {
        let key = load_or_generate_key(key_path)?;
        Ok(Self::from_key(key))
    }

    /// Build a key manager around raw key bytes.
    #[must_use]
    pub fn from_key(key: [u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Encrypt a credential. Two calls with the same input never return the same output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(envelope))
    }

    /// Decrypt a value produced by [`Self::encrypt`].
    ///
    /// Fails on invalid base64, input shorter than a nonce, or a tag mismatch
    /// (wrong key or tampered data).
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let envelope = general_purpose::STANDARD
            .decode(encrypted)
            .context("Invalid base64")?;
        if envelope.len() < NONCE_SIZE {
            anyhow::bail!("Invalid encrypted data: too short");
        }

        let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {e}"))?;

        String::from_utf8(plaintext).context("Invalid UTF-8 in decrypted data")
    }
}

fn load_or_generate_key(path: &Path) -> Result<[u8; KEY_SIZE]> {
    if path.exists() {
        let encoded = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Invalid base64 in key file")?;
        if bytes.len() != KEY_SIZE {
            anyhow::bail!("Invalid key size: expected {KEY_SIZE}, got {}", bytes.len());
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut key);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create key directory")?;
    }
    std::fs::write(path, general_purpose::STANDARD.encode(key))
        .with_context(|| format!("Failed to write key file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set key file permissions")?;
    }

    tracing::info!("🔑 Generated new credential key at {}", path.display());
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip() {
        let km = KeyManager::from_key([7u8; KEY_SIZE]);
        let encrypted = km.encrypt("tiger").expect("encrypt");
        assert_ne!(encrypted, "tiger");
        assert_eq!(km.decrypt(&encrypted).expect("decrypt"), "tiger");
    }

    #[test]
    fn test_nonce_changes_ciphertext() {
        let km = KeyManager::from_key([1u8; KEY_SIZE]);
        let a = km.encrypt("manager").expect("encrypt a");
        let b = km.encrypt("manager").expect("encrypt b");
        assert_ne!(a, b);
        assert_eq!(km.decrypt(&a).expect("decrypt a"), "manager");
        assert_eq!(km.decrypt(&b).expect("decrypt b"), "manager");
    }

    #[test]
    fn test_key_file_persists() {
        let dir = tempdir().expect("tempdir");
        let key_path = dir.path().join("keys").join("encryption.key");

        let encrypted = KeyManager::new(&key_path)
            .expect("first manager")
            .encrypt("change_on_install")
            .expect("encrypt");

        let reloaded = KeyManager::new(&key_path).expect("second manager");
        assert_eq!(reloaded.decrypt(&encrypted).expect("decrypt"), "change_on_install");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = KeyManager::from_key([1u8; KEY_SIZE])
            .encrypt("secret")
            .expect("encrypt");
        assert!(KeyManager::from_key([2u8; KEY_SIZE]).decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_invalid_input() {
        let km = KeyManager::from_key([3u8; KEY_SIZE]);
        assert!(km.decrypt("not-base64!@#$").is_err());
        assert!(km.decrypt(&general_purpose::STANDARD.encode([1, 2, 3])).is_err());
        assert!(km.decrypt(&general_purpose::STANDARD.encode([0u8; 32])).is_err());
    }

    #[test]
    fn test_bad_key_file() {
        let dir = tempdir().expect("tempdir");
        let key_path = dir.path().join("short.key");
        std::fs::write(&key_path, general_purpose::STANDARD.encode([0u8; 16])).expect("write");
        assert!(KeyManager::new(&key_path).is_err());
    }
}
