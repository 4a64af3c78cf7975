//! hotcopy-crypto: the on-disk format of the ciphertext tree
//!
//! Every mirrored file is stored as one record:
//! ```text
//! [8 bytes: plaintext size, u64 LE][16 bytes: random IV][N bytes: AES-256-CBC ciphertext]
//! ```
//! N is the plaintext size rounded up to the 16-byte block size. When the
//! plaintext is not block aligned it is padded with random bytes; the stored
//! size is the only thing used to strip them again.
//!
//! Key: SHA-256 of the password, used as-is for the whole process lifetime.
//! There is no salt, no integrity tag, and no padding check.

pub mod codec;
pub mod kdf;

pub use codec::{decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, encrypted_len, padded_len};
pub use kdf::{derive_key, MirrorKey};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES block size, also the IV size
pub const BLOCK_SIZE: usize = 16;

/// Size of the little-endian plaintext length prefix
pub const SIZE_PREFIX: usize = 8;

/// Bytes in front of the ciphertext: size prefix + IV
pub const HEADER_SIZE: usize = SIZE_PREFIX + BLOCK_SIZE;
