//! SHA-256 checksums computed over fixed-size chunks, never the whole file at once.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::errors::Result;

pub const ALGORITHM: &str = "SHA-256";

const BUFFER_SIZE: usize = 8192;

pub fn algorithm() -> &'static str {
    ALGORITHM
}

/// Lower-case hex digest of everything `reader` yields.
pub fn calculate<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn calculate_file(path: &Path) -> Result<String> {
    let checksum = calculate(File::open(path)?)?;
    tracing::debug!(path = %path.display(), checksum = %checksum, "Calculated SHA-256 checksum");
    Ok(checksum)
}

/// Compares the file's digest with `expected`, ignoring hex case.
pub fn verify_file(path: &Path, expected: &str) -> Result<bool> {
    let actual = calculate_file(path)?;
    let matches = actual.eq_ignore_ascii_case(expected.trim());
    if matches {
        tracing::info!(path = %path.display(), "Checksum verification passed");
    } else {
        tracing::error!(
            path = %path.display(),
            expected = %expected,
            actual = %actual,
            "Checksum verification failed"
        );
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() -> Result<()> {
        assert_eq!(
            calculate(&b"abc"[..])?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            calculate(&b""[..])?,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        Ok(())
    }

    #[test]
    fn file_digest_spans_multiple_chunks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("big.bin");
        let payload: Vec<u8> = (0..(BUFFER_SIZE * 3 + 17)).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &payload)?;

        let from_file = calculate_file(&path)?;
        assert_eq!(from_file, calculate(payload.as_slice())?);
        assert_eq!(from_file.len(), 64);
        assert_eq!(from_file, calculate_file(&path)?);
        Ok(())
    }

    #[test]
    fn verify_ignores_case_and_detects_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let x = dir.path().join("x.bin");
        let y = dir.path().join("y.bin");
        std::fs::write(&x, b"payload x")?;
        std::fs::write(&y, b"payload y")?;

        let checksum_x = calculate_file(&x)?;
        assert!(verify_file(&x, &checksum_x)?);
        assert!(verify_file(&x, &checksum_x.to_ascii_uppercase())?);
        assert!(!verify_file(&x, &calculate_file(&y)?)?);
        Ok(())
    }
}
