//! AES-256-CBC decryption of trigger payloads.
//!
//! The key is `SHA-256(passphrase)` and every item carries its own 16-byte IV.
//! Padding is PKCS#7 but is checked by hand after a raw CBC pass so that a
//! malformed pad is always reported as [`DecryptError::InvalidPadding`] and
//! never silently truncated.

pub mod envelope;

use aes::Aes256;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

pub use envelope::{EnvelopeError, WireRecord, decode_records, envelope_json, parse_envelope};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("envelope contains no encrypted items")]
    EmptyInput,

    #[error("decryption passphrase is empty")]
    MissingPassphrase,

    #[error("item {item}: field `{field}` is missing or not valid base64")]
    InvalidBase64 { item: usize, field: &'static str },

    #[error("item {item}: invalid IV size {len} (expected 16)")]
    InvalidIv { item: usize, len: usize },

    #[error("item {item}: ciphertext length {len} is not a non-zero multiple of 16")]
    InvalidCiphertext { item: usize, len: usize },

    #[error("item {item}: invalid padding ({detail})")]
    InvalidPadding { item: usize, detail: String },

    #[error("item {item}: decrypted bytes are not valid UTF-8")]
    InvalidEncoding { item: usize },
}

impl DecryptError {
    /// Stable catalogue code shown next to user-facing messages.
    pub fn code(&self) -> &'static str {
        match self {
            DecryptError::EmptyInput => "DEC001",
            DecryptError::MissingPassphrase => "DEC002",
            DecryptError::InvalidBase64 { .. } => "DEC003",
            DecryptError::InvalidIv { .. } => "DEC004",
            DecryptError::InvalidCiphertext { .. } => "DEC005",
            DecryptError::InvalidPadding { .. } => "DEC006",
            DecryptError::InvalidEncoding { .. } => "DEC007",
        }
    }
}

/// One encrypted fragment of a trigger script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedItem {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedItem {
    pub fn new(iv: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { iv, ciphertext }
    }
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Decrypt every item in order and concatenate the plaintext fragments.
pub fn decrypt(items: &[EncryptedItem], passphrase: &str) -> Result<String, DecryptError> {
    if items.is_empty() {
        return Err(DecryptError::EmptyInput);
    }

    let key = derive_key(passphrase);
    let mut script = String::new();
    for (index, item) in items.iter().enumerate() {
        let fragment = decrypt_item(&key, index + 1, item)?;
        debug!("Decrypted item {}/{}: {} chars", index + 1, items.len(), fragment.len());
        script.push_str(&fragment);
    }
    Ok(script)
}

fn decrypt_item(key: &[u8; 32], item: usize, encrypted: &EncryptedItem) -> Result<String, DecryptError> {
    if encrypted.iv.len() != IV_LEN {
        return Err(DecryptError::InvalidIv {
            item,
            len: encrypted.iv.len(),
        });
    }
    let len = encrypted.ciphertext.len();
    if len == 0 || len % BLOCK_LEN != 0 {
        return Err(DecryptError::InvalidCiphertext { item, len });
    }

    let cipher = Aes256CbcDec::new_from_slices(key, &encrypted.iv)
        .map_err(|_| DecryptError::InvalidIv { item, len: encrypted.iv.len() })?;
    let mut buf = encrypted.ciphertext.clone();
    let padded = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| DecryptError::InvalidCiphertext { item, len })?;

    let unpadded = strip_pkcs7(padded).map_err(|detail| DecryptError::InvalidPadding { item, detail })?;
    String::from_utf8(unpadded.to_vec()).map_err(|_| DecryptError::InvalidEncoding { item })
}

fn strip_pkcs7(padded: &[u8]) -> Result<&[u8], String> {
    let Some(&pad) = padded.last() else {
        return Err("no data".to_string());
    };
    let pad_len = pad as usize;
    if pad_len == 0 || pad_len > BLOCK_LEN || pad_len > padded.len() {
        return Err(format!("padding length {}", pad));
    }
    let (body, padding) = padded.split_at(padded.len() - pad_len);
    if padding.iter().any(|&b| b != pad) {
        return Err("padding bytes differ".to_string());
    }
    Ok(body)
}

/// Encrypt `plaintext` with a fresh random IV. Counterpart of [`decrypt`].
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<EncryptedItem, DecryptError> {
    let iv: [u8; IV_LEN] = rand::random();
    encrypt_with_iv(plaintext, passphrase, iv)
}

pub fn encrypt_with_iv(
    plaintext: &str,
    passphrase: &str,
    iv: [u8; IV_LEN],
) -> Result<EncryptedItem, DecryptError> {
    let key = derive_key(passphrase);
    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|_| DecryptError::InvalidIv { item: 1, len: iv.len() })?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(EncryptedItem::new(iv.to_vec(), ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    /// Encrypt one raw 16-byte block without padding, to forge bad pads.
    fn encrypt_raw_block(block: [u8; 16], passphrase: &str) -> EncryptedItem {
        let key = derive_key(passphrase);
        let iv = [7u8; 16];
        let cipher = Aes256CbcEnc::new_from_slices(&key, &iv).unwrap();
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&block);
        EncryptedItem::new(iv.to_vec(), ciphertext)
    }

    #[test]
    fn decrypts_known_ciphertext() {
        let item = EncryptedItem::new(
            STANDARD.decode("AAAAAAAAAAAAAAAAAAAAAA==").unwrap(),
            STANDARD.decode("mRDXNBO1A3E5NXW7Hyosuw==").unwrap(),
        );
        assert_eq!(decrypt(&[item], "geh31m").unwrap(), "SELECT 1");
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let script = "CREATE TRIGGER t ON tbl AFTER INSERT AS\nBEGIN\n    SET NOCOUNT ON;\nEND\nGO\n";
        let item = encrypt(script, "s3cret").unwrap();
        assert_eq!(item.iv.len(), IV_LEN);
        assert_eq!(decrypt(&[item], "s3cret").unwrap(), script);
    }

    #[test]
    fn roundtrip_handles_unicode_and_block_aligned_input() {
        for text in ["", "exactly16bytes!!", "Straße – 日本語 🔑"] {
            let item = encrypt(text, "pw").unwrap();
            assert_eq!(decrypt(&[item], "pw").unwrap(), text);
        }
    }

    #[test]
    fn fragments_are_concatenated_in_order() {
        let items = vec![
            encrypt("CREATE TRIGGER ", "pw").unwrap(),
            encrypt("t ON tbl ", "pw").unwrap(),
            encrypt("AFTER INSERT AS BEGIN END", "pw").unwrap(),
        ];
        assert_eq!(
            decrypt(&items, "pw").unwrap(),
            "CREATE TRIGGER t ON tbl AFTER INSERT AS BEGIN END"
        );
    }

    #[test]
    fn empty_envelope_is_rejected() {
        assert_eq!(decrypt(&[], "pw"), Err(DecryptError::EmptyInput));
    }

    #[test]
    fn empty_passphrase_is_an_ordinary_key() {
        let item = encrypt("SELECT 1", "").unwrap();
        assert_eq!(decrypt(std::slice::from_ref(&item), "").unwrap(), "SELECT 1");
        assert!(decrypt(&[item], "pw").map_or(true, |text| text != "SELECT 1"));
    }

    #[test]
    fn short_iv_is_rejected() {
        let mut item = encrypt("SELECT 1", "pw").unwrap();
        item.iv.truncate(12);
        assert_eq!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidIv { item: 1, len: 12 })
        );
    }

    #[test]
    fn unaligned_ciphertext_is_rejected() {
        let mut item = encrypt("SELECT 1", "pw").unwrap();
        item.ciphertext.pop();
        assert!(matches!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidCiphertext { item: 1, len: 15 })
        ));
    }

    #[test]
    fn zero_padding_length_is_rejected() {
        let mut block = *b"SELECT 1________";
        block[15] = 0;
        let item = encrypt_raw_block(block, "pw");
        assert!(matches!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidPadding { item: 1, .. })
        ));
    }

    #[test]
    fn oversized_padding_length_is_rejected() {
        let mut block = [17u8; 16];
        block[0] = b'S';
        let item = encrypt_raw_block(block, "pw");
        assert!(matches!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidPadding { .. })
        ));
    }

    #[test]
    fn inconsistent_padding_bytes_are_rejected() {
        let mut block = *b"SELECT 1 FROM t ";
        block[13] = 1;
        block[14] = 3;
        block[15] = 3;
        let item = encrypt_raw_block(block, "pw");
        assert!(matches!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidPadding { .. })
        ));
    }

    #[test]
    fn wrong_passphrase_never_yields_the_plaintext() {
        let item = encrypt("SELECT 1", "right").unwrap();
        match decrypt(&[item], "wrong") {
            Ok(text) => assert_ne!(text, "SELECT 1"),
            Err(err) => assert!(matches!(
                err,
                DecryptError::InvalidPadding { .. } | DecryptError::InvalidEncoding { .. }
            )),
        }
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut block = [1u8; 16];
        block[0] = 0xff;
        block[1] = 0xfe;
        let item = encrypt_raw_block(block, "pw");
        assert_eq!(
            decrypt(&[item], "pw"),
            Err(DecryptError::InvalidEncoding { item: 1 })
        );
    }
}
