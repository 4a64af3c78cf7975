//! Whole-file AES-256-CBC encryption/decryption
//!
//! Record format (binary):
//! ```text
//! offset 0   [8 bytes: original plaintext size, u64 little-endian]
//! offset 8   [16 bytes: IV, fresh per encryption]
//! offset 24  [N bytes: ciphertext, N = padded_len(size)]
//! ```
//!
//! Block-aligned plaintext gets no padding at all, so there is no padding
//! indicator; the size prefix alone says where the plaintext ends.

use std::path::Path;

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hotcopy_core::{HotcopyError, HotcopyResult};
use rand::{rngs::OsRng, RngCore};

use crate::kdf::MirrorKey;
use crate::{BLOCK_SIZE, HEADER_SIZE, SIZE_PREFIX};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Plaintext length rounded up to the next block boundary (unchanged if aligned).
pub fn padded_len(plaintext_len: usize) -> usize {
    match plaintext_len % BLOCK_SIZE {
        0 => plaintext_len,
        rem => plaintext_len + (BLOCK_SIZE - rem),
    }
}

/// Total record size for a plaintext of the given length.
pub fn encrypted_len(plaintext_len: usize) -> usize {
    HEADER_SIZE + padded_len(plaintext_len)
}

/// Encrypt `plaintext` into a complete record.
pub fn encrypt_bytes(key: &MirrorKey, plaintext: &[u8]) -> HotcopyResult<Vec<u8>> {
    let padded = padded_len(plaintext.len());

    let mut record = Vec::with_capacity(HEADER_SIZE + padded);
    record.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());

    let mut iv = [0u8; BLOCK_SIZE];
    fill_random(&mut iv)?;
    record.extend_from_slice(&iv);

    // Random filler up to the block boundary, never validated on decrypt
    record.extend_from_slice(plaintext);
    let pad_start = record.len();
    record.resize(HEADER_SIZE + padded, 0);
    fill_random(&mut record[pad_start..])?;

    if padded > 0 {
        encrypt_blocks(key, &iv, &mut record[HEADER_SIZE..])?;
    }

    Ok(record)
}

/// CBC-encrypt `buf` in place. The caller pads it to whole blocks first.
fn encrypt_blocks(key: &MirrorKey, iv: &[u8; BLOCK_SIZE], buf: &mut [u8]) -> HotcopyResult<()> {
    let len = buf.len();
    Aes256CbcEnc::new(key.as_bytes().into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| anyhow::anyhow!("encrypt buffer of {len} bytes is not block aligned"))?;
    Ok(())
}

/// Decrypt a complete record back to the original plaintext.
pub fn decrypt_bytes(key: &MirrorKey, record: &[u8]) -> HotcopyResult<Vec<u8>> {
    if record.len() < HEADER_SIZE {
        return Err(HotcopyError::Format(format!(
            "record too short: {} bytes (header is {HEADER_SIZE})",
            record.len()
        )));
    }

    let (size_bytes, rest) = record.split_at(SIZE_PREFIX);
    let (iv, ciphertext) = rest.split_at(BLOCK_SIZE);

    let mut size_le = [0u8; SIZE_PREFIX];
    size_le.copy_from_slice(size_bytes);
    let orig_size = u64::from_le_bytes(size_le);

    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(HotcopyError::Format(format!(
            "ciphertext length {} is not a multiple of the block size",
            ciphertext.len()
        )));
    }
    if orig_size > ciphertext.len() as u64 {
        return Err(HotcopyError::Format(format!(
            "stored size {orig_size} exceeds ciphertext length {}",
            ciphertext.len()
        )));
    }

    let mut plaintext = ciphertext.to_vec();
    if !plaintext.is_empty() {
        Aes256CbcDec::new(key.as_bytes().into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut plaintext)
            .map_err(|_| HotcopyError::Format("ciphertext is not block aligned".into()))?;
    }
    plaintext.truncate(orig_size as usize);

    Ok(plaintext)
}

/// Encrypt the file at `src` into a record at `dst`. Returns the plaintext size.
pub fn encrypt_file(key: &MirrorKey, src: &Path, dst: &Path) -> HotcopyResult<u64> {
    let plaintext = std::fs::read(src).map_err(|e| HotcopyError::io(src, e))?;
    let record = encrypt_bytes(key, &plaintext)?;
    std::fs::write(dst, &record).map_err(|e| HotcopyError::io(dst, e))?;

    tracing::trace!(
        src = %src.display(),
        dst = %dst.display(),
        bytes = plaintext.len(),
        "encrypted"
    );
    Ok(plaintext.len() as u64)
}

/// Decrypt the record at `src` into plaintext at `dst`. Returns the plaintext size.
///
/// A malformed record fails before `dst` is touched.
pub fn decrypt_file(key: &MirrorKey, src: &Path, dst: &Path) -> HotcopyResult<u64> {
    let record = std::fs::read(src).map_err(|e| HotcopyError::io(src, e))?;
    let plaintext = decrypt_bytes(key, &record).map_err(|e| match e {
        HotcopyError::Format(msg) => HotcopyError::Format(format!("{}: {msg}", src.display())),
        other => other,
    })?;
    std::fs::write(dst, &plaintext).map_err(|e| HotcopyError::io(dst, e))?;

    tracing::trace!(
        src = %src.display(),
        dst = %dst.display(),
        bytes = plaintext.len(),
        "decrypted"
    );
    Ok(plaintext.len() as u64)
}

fn fill_random(buf: &mut [u8]) -> HotcopyResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| HotcopyError::Random(e.to_string()))
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    fn key_from(password: &str) -> MirrorKey {
        crate::kdf::derive_key(&secrecy::SecretString::from(password))
    }

    proptest! {
        #[test]
        fn roundtrip_any_content(
            data in proptest::collection::vec(any::<u8>(), 0..=2048),
            password in "[ -~]{0,32}",
        ) {
            let key = key_from(&password);
            let record = encrypt_bytes(&key, &data).unwrap();
            prop_assert_eq!(decrypt_bytes(&key, &record).unwrap(), data);
        }

        #[test]
        fn record_size_law(len in 0usize..=4096) {
            let key = key_from("size-law");
            let record = encrypt_bytes(&key, &vec![0xA5u8; len]).unwrap();
            let n = if len % 16 == 0 { len } else { len + (16 - len % 16) };
            prop_assert_eq!(record.len(), 24 + n);
        }
    }
}
