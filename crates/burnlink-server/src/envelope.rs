//! Transport format for an encrypted secret.
//!
//! Layout: `IV (16 bytes) || AES-CBC ciphertext`, where the plaintext was
//! PKCS7-padded to a whole number of blocks before encryption. Both the key
//! and the envelope travel as standard base64.
//!
//! [`decrypt`] validates the envelope one step at a time and reports exactly
//! which step rejected it. Callers facing the network must collapse every
//! [`DecryptError`] into a single generic message.

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{
    generic_array::GenericArray, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit,
    KeyIvInit,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{ZeroizeOnDrop, Zeroizing};

/// AES block size, which is also the IV length.
pub const BLOCK_SIZE: usize = 16;

/// Length of keys produced by [`generate_key`] (AES-256).
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecryptError {
    #[error("key is not valid base64")]
    InvalidKeyEncoding,

    #[error("data is not valid base64")]
    InvalidDataEncoding,

    #[error("ciphertext too short: {len} bytes leaves no room for an IV")]
    CiphertextTooShort { len: usize },

    #[error("ciphertext length {len} is not a multiple of the block size")]
    NotBlockAligned { len: usize },

    #[error("no ciphertext after IV")]
    EmptyCiphertext,

    #[error("invalid key size: {0} bytes")]
    InvalidKeySize(usize),

    #[error("invalid padding byte {0}")]
    InvalidPadding(u8),

    #[error("padding of {padding} bytes exceeds decrypted length {len}")]
    PaddingExceedsLength { padding: usize, len: usize },

    #[error("invalid PKCS7 padding")]
    InvalidPkcs7Padding,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("content exceeds maximum length of {max} characters")]
    EncodedTooLong { len: usize, max: usize },

    #[error("decrypted content exceeds maximum length of {max} bytes")]
    DecodedTooLong { len: usize, max: usize },
}

/// 32-byte single-use AES-256 key.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a standard base64 AES-256 key.
    pub fn from_base64(encoded: &str) -> Result<Self, DecryptError> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|_| DecryptError::InvalidKeyEncoding)?,
        );
        let bytes: [u8; KEY_SIZE] = raw
            .as_slice()
            .try_into()
            .map_err(|_| DecryptError::InvalidKeySize(raw.len()))?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Standard base64, the form keys take at the transport boundary.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

/// Generate a fresh key from the OS random generator.
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Output of [`encrypt`]: the per-call IV and the padded ciphertext.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub iv: [u8; BLOCK_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// `IV || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOCK_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// `IV || ciphertext` in standard base64, ready for [`decrypt`].
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

/// PKCS7-pad `plaintext` and encrypt it under AES-256-CBC with a fresh random IV.
///
/// The ciphertext is always longer than the plaintext: a block-aligned input
/// gains a full block of padding.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Sealed {
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut ciphertext = pkcs7_pad(plaintext);
    cbc_encrypt::<Aes256>(key.as_bytes(), &iv, &mut ciphertext);

    Sealed { iv, ciphertext }
}

/// Decode, decrypt, and unpad a base64 envelope with a base64 key.
pub fn decrypt(encoded: &str, key: &str) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    let key = Zeroizing::new(
        STANDARD
            .decode(key)
            .map_err(|_| DecryptError::InvalidKeyEncoding)?,
    );
    let mut data = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|_| DecryptError::InvalidDataEncoding)?,
    );

    let plaintext = open(&mut data, &key)?;
    Ok(Zeroizing::new(plaintext.to_vec()))
}

/// [`decrypt`] with a key that has already been parsed.
pub fn decrypt_with(
    encoded: &str,
    key: &EncryptionKey,
) -> Result<Zeroizing<Vec<u8>>, DecryptError> {
    let mut data = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|_| DecryptError::InvalidDataEncoding)?,
    );

    let plaintext = open(&mut data, key.as_bytes())?;
    Ok(Zeroizing::new(plaintext.to_vec()))
}

/// Decrypt a raw `IV || ciphertext` buffer in place and return the unpadded plaintext.
pub fn open<'a>(data: &'a mut [u8], key: &[u8]) -> Result<&'a [u8], DecryptError> {
    let len = data.len();
    if len < BLOCK_SIZE {
        return Err(DecryptError::CiphertextTooShort { len });
    }
    if len % BLOCK_SIZE != 0 {
        return Err(DecryptError::NotBlockAligned { len });
    }

    let (iv, ciphertext) = data.split_at_mut(BLOCK_SIZE);
    if ciphertext.is_empty() {
        return Err(DecryptError::EmptyCiphertext);
    }

    match key.len() {
        16 => cbc_decrypt::<Aes128>(key, iv, ciphertext)?,
        24 => cbc_decrypt::<Aes192>(key, iv, ciphertext)?,
        32 => cbc_decrypt::<Aes256>(key, iv, ciphertext)?,
        n => return Err(DecryptError::InvalidKeySize(n)),
    }

    let unpadded = pkcs7_unpad(ciphertext)?.len();
    Ok(&data[BLOCK_SIZE..BLOCK_SIZE + unpadded])
}

/// Append PKCS7 padding: 1 to 16 bytes, each equal to the pad length.
pub fn pkcs7_pad(plaintext: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(plaintext.len() + pad);
    out.extend_from_slice(plaintext);
    out.resize(plaintext.len() + pad, pad as u8);
    out
}

/// Validate and strip PKCS7 padding.
///
/// Every pad byte is checked, and the comparison does not stop at the first
/// mismatch.
pub fn pkcs7_unpad(padded: &[u8]) -> Result<&[u8], DecryptError> {
    let last = padded.last().copied().unwrap_or(0);
    if last == 0 || last as usize > BLOCK_SIZE {
        return Err(DecryptError::InvalidPadding(last));
    }

    let padding = last as usize;
    if padding > padded.len() {
        return Err(DecryptError::PaddingExceedsLength {
            padding,
            len: padded.len(),
        });
    }

    let (body, tail) = padded.split_at(padded.len() - padding);
    let mismatch = tail.iter().fold(0u8, |acc, &b| acc | (b ^ last));
    if mismatch != 0 {
        return Err(DecryptError::InvalidPkcs7Padding);
    }
    Ok(body)
}

/// Reject wire content longer than `max` (inclusive bound).
pub fn check_encoded_len(content: &str, max: usize) -> Result<(), SizeError> {
    let len = content.len();
    if len > max {
        return Err(SizeError::EncodedTooLong { len, max });
    }
    Ok(())
}

/// Reject decoded content longer than `max` (inclusive bound).
pub fn check_decoded_len(bytes: &[u8], max: usize) -> Result<(), SizeError> {
    let len = bytes.len();
    if len > max {
        return Err(SizeError::DecodedTooLong { len, max });
    }
    Ok(())
}

// Callers guarantee `buf` is block aligned and the key length matches `C`.
fn cbc_encrypt<C>(key: &[u8], iv: &[u8; BLOCK_SIZE], buf: &mut [u8])
where
    C: BlockCipher + BlockEncryptMut + KeyInit,
{
    let mut mode =
        cbc::Encryptor::<C>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        mode.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), DecryptError>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let mut mode = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| DecryptError::InvalidKeySize(key.len()))?;
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        mode.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encrypt block-aligned `blocks` without adding padding, so tests can
    /// control exactly what the decrypted tail looks like.
    fn seal_unpadded(blocks: &[u8], key: &[u8]) -> String {
        let iv = [7u8; BLOCK_SIZE];
        let mut buf = blocks.to_vec();
        match key.len() {
            16 => cbc_encrypt::<Aes128>(key, &iv, &mut buf),
            32 => cbc_encrypt::<Aes256>(key, &iv, &mut buf),
            n => panic!("unsupported test key size {n}"),
        }
        let mut out = iv.to_vec();
        out.extend_from_slice(&buf);
        STANDARD.encode(out)
    }

    #[test]
    fn round_trip() {
        let key = generate_key();
        for n in [0usize, 1, 5, 15, 16, 17, 31, 32, 100] {
            let plaintext: Vec<u8> = (0..n).map(|i| b'a' + (i % 26) as u8).collect();
            let sealed = encrypt(&plaintext, &key);
            assert_eq!(sealed.ciphertext.len(), (n / BLOCK_SIZE + 1) * BLOCK_SIZE);

            let opened = decrypt(&sealed.to_base64(), &key.to_base64()).unwrap();
            assert_eq!(opened.as_slice(), plaintext.as_slice(), "length {n}");
        }
    }

    #[test]
    fn fresh_keys_and_ivs() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes());

        let a = encrypt(b"same", &k1);
        let b = encrypt(b"same", &k1);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn aes128_key_accepted() {
        let key = [3u8; 16];
        let encoded = seal_unpadded(&pkcs7_pad(b"short key"), &key);
        let opened = decrypt(&encoded, &STANDARD.encode(key)).unwrap();
        assert_eq!(opened.as_slice(), b"short key");
    }

    #[test]
    fn rejects_bad_key_encoding() {
        let sealed = encrypt(b"x", &generate_key());
        assert_eq!(
            decrypt(&sealed.to_base64(), "not base64!!"),
            Err(DecryptError::InvalidKeyEncoding)
        );
    }

    #[test]
    fn rejects_bad_data_encoding() {
        let key = generate_key().to_base64();
        assert_eq!(
            decrypt("%%%", &key),
            Err(DecryptError::InvalidDataEncoding)
        );
    }

    #[test]
    fn rejects_short_and_misaligned_data() {
        let key = generate_key().to_base64();
        assert_eq!(
            decrypt(&STANDARD.encode([0u8; 8]), &key),
            Err(DecryptError::CiphertextTooShort { len: 8 })
        );
        assert_eq!(
            decrypt(&STANDARD.encode([0u8; 20]), &key),
            Err(DecryptError::NotBlockAligned { len: 20 })
        );
        assert_eq!(
            decrypt(&STANDARD.encode([0u8; 16]), &key),
            Err(DecryptError::EmptyCiphertext)
        );
    }

    #[test]
    fn rejects_bad_key_size_after_length_checks() {
        let bad_key = STANDARD.encode([1u8; 10]);
        assert_eq!(
            decrypt(&STANDARD.encode([0u8; 8]), &bad_key),
            Err(DecryptError::CiphertextTooShort { len: 8 })
        );
        assert_eq!(
            decrypt(&STANDARD.encode([0u8; 32]), &bad_key),
            Err(DecryptError::InvalidKeySize(10))
        );
    }

    #[test]
    fn rejects_zero_and_oversized_pad_byte() {
        let key = [9u8; 32];
        let key_b64 = STANDARD.encode(key);

        let mut zero = [b'z'; 16];
        zero[15] = 0;
        assert_eq!(
            decrypt(&seal_unpadded(&zero, &key), &key_b64),
            Err(DecryptError::InvalidPadding(0))
        );

        let mut big = [b'z'; 16];
        big[15] = 17;
        assert_eq!(
            decrypt(&seal_unpadded(&big, &key), &key_b64),
            Err(DecryptError::InvalidPadding(17))
        );
    }

    #[test]
    fn rejects_inconsistent_pad_bytes() {
        let key = [9u8; 32];
        let mut block = [b'z'; 16];
        block[13] = 3;
        block[14] = 2;
        block[15] = 3;
        assert_eq!(
            decrypt(&seal_unpadded(&block, &key), &STANDARD.encode(key)),
            Err(DecryptError::InvalidPkcs7Padding)
        );
    }

    #[test]
    fn key_from_base64() {
        let key = generate_key();
        let parsed = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());

        let sealed = encrypt(b"parsed key", &key).to_base64();
        assert_eq!(decrypt_with(&sealed, &parsed).unwrap().as_slice(), b"parsed key");
    }

    #[test]
    fn key_from_base64_rejects_malformed() {
        assert_eq!(
            EncryptionKey::from_base64("not base64!").err(),
            Some(DecryptError::InvalidKeyEncoding)
        );
    }

    #[test]
    fn key_from_base64_requires_32_bytes() {
        assert_eq!(
            EncryptionKey::from_base64(&STANDARD.encode([1u8; 16])).err(),
            Some(DecryptError::InvalidKeySize(16))
        );
        assert_eq!(
            EncryptionKey::from_base64("").err(),
            Some(DecryptError::InvalidKeySize(0))
        );
    }

    #[test]
    fn full_pad_block_strips_to_empty() {
        let key = [9u8; 32];
        let encoded = seal_unpadded(&[16u8; 16], &key);
        let opened = decrypt(&encoded, &STANDARD.encode(key)).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn unpad_checks_length() {
        assert_eq!(
            pkcs7_unpad(&[1, 2, 5]),
            Err(DecryptError::PaddingExceedsLength { padding: 5, len: 3 })
        );
        assert_eq!(pkcs7_unpad(&[]), Err(DecryptError::InvalidPadding(0)));
        assert_eq!(pkcs7_unpad(&[b'a', 2, 2]).unwrap(), b"a");
    }

    #[test]
    fn pad_lengths() {
        assert_eq!(pkcs7_pad(b"").len(), 16);
        assert_eq!(pkcs7_pad(&[0u8; 15]).last(), Some(&1));
        assert_eq!(pkcs7_pad(&[0u8; 16]), [vec![0u8; 16], vec![16u8; 16]].concat());
    }

    #[test]
    fn size_limits_are_inclusive() {
        let at_limit = "a".repeat(10);
        assert!(check_encoded_len(&at_limit, 10).is_ok());
        assert_eq!(
            check_encoded_len(&"a".repeat(11), 10),
            Err(SizeError::EncodedTooLong { len: 11, max: 10 })
        );
        assert!(check_decoded_len(&[0u8; 10], 10).is_ok());
        assert!(check_decoded_len(&[0u8; 11], 10).is_err());
    }
}
