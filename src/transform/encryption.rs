//! Streaming AES-256-GCM file encryption.
//!
//! Encrypted file layout, written as one continuous stream:
//!
//! ```text
//! [iv length: 1 byte = 12][iv: 12 bytes][ciphertext ...][tag: 16 bytes]
//! ```
//!
//! The payload is processed in 8 KiB chunks so memory use does not depend on
//! file size. GCM is assembled from the AES block cipher, a 32-bit big-endian
//! CTR keystream and GHASH, which yields output identical to one-shot
//! AES-256-GCM with an empty AAD. Decryption checks the tag before reporting
//! success and removes its output file on any failure.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use ghash::GHash;
use ghash::universal_hash::UniversalHash;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, Result};

pub const ALGORITHM: &str = "AES-256-GCM";

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const BUFFER_SIZE: usize = 8192;
const ENCRYPTED_EXTENSION: &str = ".enc";

type Ctr32 = ctr::Ctr32BE<Aes256>;

/// 256-bit symmetric key. `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AppError::Encryption(format!(
                "Invalid key length: expected {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| AppError::Encryption(format!("Key is not valid hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Key source for one encryption or decryption call.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    key: Option<EncryptionKey>,
    algorithm: String,
}

impl EncryptionConfig {
    pub fn with_key(key: EncryptionKey) -> Self {
        Self {
            key: Some(key),
            algorithm: ALGORITHM.to_string(),
        }
    }

    /// No key supplied: encryption generates a throwaway key. Data encrypted
    /// this way cannot be decrypted later.
    pub fn ephemeral() -> Self {
        Self {
            key: None,
            algorithm: ALGORITHM.to_string(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn is_ephemeral(&self) -> bool {
        self.key.is_none()
    }
}

/// Streaming AES-256-GCM engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmEncryptor;

impl AesGcmEncryptor {
    pub fn new() -> Self {
        Self
    }

    pub fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    /// Encrypts `input` into `<input>.enc` and returns the new path.
    pub fn encrypt(&self, input: &Path, config: &EncryptionConfig) -> Result<PathBuf> {
        let key = match &config.key {
            Some(key) => key.clone(),
            None => {
                tracing::warn!(
                    "No encryption key provided, generating an ephemeral key; this backup cannot be decrypted later"
                );
                EncryptionKey::generate()
            }
        };

        let output = encrypted_path(input);
        tracing::info!(input = %input.display(), output = %output.display(), "Encrypting file");

        let result = (|| -> Result<u64> {
            let reader = BufReader::new(File::open(input)?);
            let mut writer = BufWriter::new(File::create(&output)?);
            let written = self.encrypt_stream(&key, reader, &mut writer)?;
            writer.flush()?;
            Ok(written)
        })();

        match result {
            Ok(written) => {
                tracing::debug!(output = %output.display(), bytes = written, "File encrypted");
                Ok(output)
            }
            Err(err) => {
                discard_partial(&output);
                Err(err)
            }
        }
    }

    /// Decrypts `input` and returns the plaintext path: `.enc` stripped, or
    /// `.dec` appended when the input has no `.enc` suffix.
    pub fn decrypt(&self, input: &Path, config: &EncryptionConfig) -> Result<PathBuf> {
        let key = config.key.as_ref().ok_or_else(|| {
            AppError::Encryption("A key is required to decrypt a backup".to_string())
        })?;

        let output = decrypted_path(input);
        tracing::info!(input = %input.display(), output = %output.display(), "Decrypting file");

        let result = (|| -> Result<u64> {
            let reader = BufReader::new(File::open(input)?);
            let mut writer = BufWriter::new(File::create(&output)?);
            let written = self.decrypt_stream(key, reader, &mut writer)?;
            writer.flush()?;
            Ok(written)
        })();

        match result {
            Ok(written) => {
                tracing::debug!(output = %output.display(), bytes = written, "File decrypted");
                Ok(output)
            }
            Err(err) => {
                discard_partial(&output);
                Err(err)
            }
        }
    }

    /// Writes header, ciphertext and tag for everything `reader` yields.
    /// Returns the number of bytes written.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        key: &EncryptionKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        writer.write_all(&[IV_LEN as u8])?;
        writer.write_all(&iv)?;
        let mut written = (1 + IV_LEN) as u64;

        let mut gcm = GcmStream::new(key, &iv);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = read_some(&mut reader, &mut buffer)?;
            if read == 0 {
                break;
            }
            let chunk = &mut buffer[..read];
            gcm.apply_keystream(chunk)?;
            gcm.absorb_ciphertext(chunk);
            writer.write_all(chunk)?;
            written += read as u64;
        }

        let tag = gcm.finalize_tag();
        writer.write_all(&tag)?;
        Ok(written + TAG_LEN as u64)
    }

    /// Reads the header, streams plaintext to `writer` and fails with
    /// [`AppError::Integrity`] when the trailing tag does not authenticate.
    /// Callers must discard whatever was written if this returns an error.
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        key: &EncryptionKey,
        mut reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let mut iv_len = [0u8; 1];
        reader
            .read_exact(&mut iv_len)
            .map_err(|_| AppError::Integrity("Encrypted file is missing its header".to_string()))?;
        if iv_len[0] as usize != IV_LEN {
            return Err(AppError::Integrity(format!(
                "Unsupported IV length {} (expected {IV_LEN})",
                iv_len[0]
            )));
        }
        let mut iv = [0u8; IV_LEN];
        reader
            .read_exact(&mut iv)
            .map_err(|_| AppError::Integrity("Encrypted file header is truncated".to_string()))?;

        let mut gcm = GcmStream::new(key, &iv);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        // The final TAG_LEN bytes of the stream are the tag, so always hold
        // back that many bytes until EOF.
        let mut pending: Vec<u8> = Vec::with_capacity(BUFFER_SIZE + TAG_LEN);
        let mut written = 0u64;
        loop {
            let read = read_some(&mut reader, &mut buffer)?;
            if read == 0 {
                break;
            }
            pending.extend_from_slice(&buffer[..read]);
            if pending.len() > TAG_LEN {
                let ready = pending.len() - TAG_LEN;
                let mut chunk: Vec<u8> = pending.drain(..ready).collect();
                gcm.absorb_ciphertext(&chunk);
                gcm.apply_keystream(&mut chunk)?;
                writer.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
        }

        if pending.len() != TAG_LEN {
            return Err(AppError::Integrity(
                "Encrypted file is too short to hold an authentication tag".to_string(),
            ));
        }
        let expected = gcm.finalize_tag();
        if !bool::from(expected[..].ct_eq(pending.as_slice())) {
            return Err(AppError::Integrity(
                "Authentication tag mismatch: wrong key or tampered ciphertext".to_string(),
            ));
        }
        Ok(written)
    }
}

/// Incremental GCM state for one (key, IV) pair.
struct GcmStream {
    ctr: Ctr32,
    ghash: GHash,
    tag_mask: [u8; BLOCK_LEN],
    partial: [u8; BLOCK_LEN],
    partial_len: usize,
    ciphertext_len: u64,
}

impl GcmStream {
    fn new(key: &EncryptionKey, iv: &[u8; IV_LEN]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key.as_bytes()));

        let mut hash_key = GenericArray::default();
        cipher.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);

        // J0 = IV || 0^31 || 1 for a 96-bit IV.
        let mut j0 = [0u8; BLOCK_LEN];
        j0[..IV_LEN].copy_from_slice(iv);
        j0[BLOCK_LEN - 1] = 1;

        let mut tag_mask = GenericArray::clone_from_slice(&j0);
        cipher.encrypt_block(&mut tag_mask);

        // Payload keystream starts at inc32(J0).
        let mut counter = j0;
        counter[BLOCK_LEN - 1] = 2;
        let ctr = Ctr32::new(
            GenericArray::from_slice(key.as_bytes()),
            GenericArray::from_slice(&counter),
        );

        let mut mask = [0u8; BLOCK_LEN];
        mask.copy_from_slice(&tag_mask);

        Self {
            ctr,
            ghash,
            tag_mask: mask,
            partial: [0u8; BLOCK_LEN],
            partial_len: 0,
            ciphertext_len: 0,
        }
    }

    fn apply_keystream(&mut self, data: &mut [u8]) -> Result<()> {
        self.ctr.try_apply_keystream(data).map_err(|_| {
            AppError::Encryption("Input exceeds the GCM keystream limit".to_string())
        })
    }

    /// Feeds ciphertext into GHASH in whole blocks, buffering any remainder.
    fn absorb_ciphertext(&mut self, mut data: &[u8]) {
        self.ciphertext_len += data.len() as u64;

        if self.partial_len > 0 {
            let take = (BLOCK_LEN - self.partial_len).min(data.len());
            self.partial[self.partial_len..self.partial_len + take].copy_from_slice(&data[..take]);
            self.partial_len += take;
            data = &data[take..];
            if self.partial_len < BLOCK_LEN {
                return;
            }
            let block = GenericArray::clone_from_slice(&self.partial);
            self.ghash.update(&[block]);
            self.partial_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            self.ghash.update(&[GenericArray::clone_from_slice(block)]);
        }
        let rest = blocks.remainder();
        self.partial[..rest.len()].copy_from_slice(rest);
        self.partial_len = rest.len();
    }

    fn finalize_tag(mut self) -> [u8; TAG_LEN] {
        if self.partial_len > 0 {
            self.ghash.update_padded(&self.partial[..self.partial_len]);
        }

        // len(A) = 0 bits, len(C) in bits.
        let mut lengths = [0u8; BLOCK_LEN];
        lengths[8..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        self.ghash.update(&[GenericArray::clone_from_slice(&lengths)]);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_LEN];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ self.tag_mask[i];
        }
        tag
    }
}

fn read_some<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    loop {
        match reader.read(buffer) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn encrypted_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

fn decrypted_path(input: &Path) -> PathBuf {
    let raw = input.to_string_lossy();
    match raw.strip_suffix(ENCRYPTED_EXTENSION) {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => {
            let mut name = input.as_os_str().to_owned();
            name.push(".dec");
            PathBuf::from(name)
        }
    }
}

fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::{Aead, KeyInit as AeadKeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::from_bytes(&[byte; KEY_LEN]).expect("valid key")
    }

    fn encrypt_bytes(key: &EncryptionKey, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        AesGcmEncryptor::new()
            .encrypt_stream(key, plaintext, &mut out)
            .expect("encrypt");
        out
    }

    #[test]
    fn round_trip_across_chunk_boundaries() -> Result<()> {
        let key = key(7);
        for len in [0usize, 1, 15, 16, 17, BUFFER_SIZE - 1, BUFFER_SIZE, BUFFER_SIZE * 3 + 5] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
            let encrypted = encrypt_bytes(&key, &plaintext);
            assert_eq!(encrypted.len(), 1 + IV_LEN + len + TAG_LEN);
            assert_eq!(encrypted[0] as usize, IV_LEN);

            let mut decrypted = Vec::new();
            AesGcmEncryptor::new().decrypt_stream(&key, encrypted.as_slice(), &mut decrypted)?;
            assert_eq!(decrypted, plaintext, "length {len}");
        }
        Ok(())
    }

    #[test]
    fn output_matches_one_shot_aes_gcm() {
        let key = key(42);
        let plaintext: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        let encrypted = encrypt_bytes(&key, &plaintext);

        let iv = &encrypted[1..1 + IV_LEN];
        let body = &encrypted[1 + IV_LEN..];
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length");
        let decrypted = cipher
            .decrypt(Nonce::from_slice(iv), body)
            .expect("aes-gcm accepts streaming output");
        assert_eq!(decrypted, plaintext);

        let reference = cipher
            .encrypt(Nonce::from_slice(iv), plaintext.as_slice())
            .expect("encrypt");
        assert_eq!(reference, body);
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let key = key(1);
        let a = encrypt_bytes(&key, b"same plaintext");
        let b = encrypt_bytes(&key, b"same plaintext");
        assert_ne!(a[1..1 + IV_LEN], b[1..1 + IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_an_integrity_error() {
        let encrypted = encrypt_bytes(&key(1), b"secret dump contents");
        let mut out = Vec::new();
        let err = AesGcmEncryptor::new()
            .decrypt_stream(&key(2), encrypted.as_slice(), &mut out)
            .unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
    }

    #[test]
    fn tampering_is_detected() {
        let key = key(9);
        let original = encrypt_bytes(&key, &vec![0xAB; 3000]);
        for position in [1 + IV_LEN, 1 + IV_LEN + 1500, original.len() - 1, 3] {
            let mut tampered = original.clone();
            tampered[position] ^= 0x01;
            let mut out = Vec::new();
            let err = AesGcmEncryptor::new()
                .decrypt_stream(&key, tampered.as_slice(), &mut out)
                .unwrap_err();
            assert!(matches!(err, AppError::Integrity(_)), "byte {position}");
        }
    }

    #[test]
    fn truncated_input_fails_closed() {
        let key = key(3);
        let encrypted = encrypt_bytes(&key, b"short");
        for cut in [0, 1, 5, 1 + IV_LEN + 4] {
            let mut out = Vec::new();
            let result = AesGcmEncryptor::new().decrypt_stream(&key, &encrypted[..cut], &mut out);
            assert!(matches!(result, Err(AppError::Integrity(_))), "cut at {cut}");
        }
    }

    #[test]
    fn file_round_trip_and_naming() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("backup.dump.gz");
        std::fs::write(&input, b"compressed dump bytes")?;
        let config = EncryptionConfig::with_key(key(5));
        let engine = AesGcmEncryptor::new();

        let encrypted = engine.encrypt(&input, &config)?;
        assert_eq!(encrypted, dir.path().join("backup.dump.gz.enc"));

        std::fs::remove_file(&input)?;
        let decrypted = engine.decrypt(&encrypted, &config)?;
        assert_eq!(decrypted, input);
        assert_eq!(std::fs::read(&decrypted)?, b"compressed dump bytes");
        Ok(())
    }

    #[test]
    fn failed_file_decryption_leaves_no_plaintext() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("data.bin");
        std::fs::write(&input, vec![0x5A; 40_000])?;
        let engine = AesGcmEncryptor::new();
        let encrypted = engine.encrypt(&input, &EncryptionConfig::with_key(key(1)))?;
        std::fs::remove_file(&input)?;

        let err = engine
            .decrypt(&encrypted, &EncryptionConfig::with_key(key(2)))
            .unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
        assert!(!input.exists());
        Ok(())
    }

    #[test]
    fn ephemeral_config_encrypts_but_cannot_decrypt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("data.bin");
        std::fs::write(&input, b"throwaway")?;
        let engine = AesGcmEncryptor::new();
        let config = EncryptionConfig::ephemeral();
        assert!(config.is_ephemeral());

        let encrypted = engine.encrypt(&input, &config)?;
        assert!(encrypted.exists());
        assert!(matches!(
            engine.decrypt(&encrypted, &config),
            Err(AppError::Encryption(_))
        ));
        Ok(())
    }

    #[test]
    fn key_parsing() {
        let hex_key = "00".repeat(KEY_LEN);
        assert!(EncryptionKey::from_hex(&hex_key).is_ok());
        assert!(EncryptionKey::from_hex("abcd").is_err());
        assert!(EncryptionKey::from_hex("zz").is_err());
        assert_eq!(format!("{:?}", key(1)), "EncryptionKey(<redacted>)");
    }
}
