//! Key derivation: password → SHA-256 → AES-256 key

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// The 256-bit key every file in the mirror is encrypted under.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MirrorKey {
    bytes: [u8; KEY_SIZE],
}

impl MirrorKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MirrorKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MirrorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the mirror key from a password: a single unsalted SHA-256 pass.
///
/// Identical passwords always yield identical keys, which is what lets a
/// restarted daemon read the files it wrote before.
pub fn derive_key(password: &SecretString) -> MirrorKey {
    let digest = Sha256::digest(password.expose_secret().as_bytes());
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest);
    MirrorKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_deterministic() {
        let key1 = derive_key(&SecretString::from("testkey"));
        let key2 = derive_key(&SecretString::from("testkey"));

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
        assert_eq!(key1.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_derive_different_passwords() {
        let key1 = derive_key(&SecretString::from("password-a"));
        let key2 = derive_key(&SecretString::from("password-b"));

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_derive_matches_sha256() {
        // SHA-256("testkey")
        let expected: [u8; KEY_SIZE] = Sha256::digest(b"testkey").into();
        let key = derive_key(&SecretString::from("testkey"));
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_debug_redacts() {
        let key = MirrorKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("7, 7"));
    }
}
