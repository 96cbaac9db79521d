// dbbackup/src/transform/compression.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{AppError, Result};

/// Zip entries above this size need the zip64 extension.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionAlgorithm {
    None,
    Gzip,
    Zip,
}

impl CompressionAlgorithm {
    /// Suffix appended to the artifact name, empty for [`CompressionAlgorithm::None`].
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "",
            CompressionAlgorithm::Gzip => ".gz",
            CompressionAlgorithm::Zip => ".zip",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "NONE"),
            CompressionAlgorithm::Gzip => write!(f, "GZIP"),
            CompressionAlgorithm::Zip => write!(f, "ZIP"),
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(CompressionAlgorithm::None),
            "GZIP" | "GZ" => Ok(CompressionAlgorithm::Gzip),
            "ZIP" => Ok(CompressionAlgorithm::Zip),
            other => Err(AppError::Config(format!(
                "Unknown compression algorithm '{other}'. Expected one of NONE, GZIP, ZIP"
            ))),
        }
    }
}

/// Compresses `source` next to itself and returns the new file.
///
/// `NONE` returns `source` unchanged; callers must not treat it as a new file.
pub fn compress_file(source: &Path, algorithm: CompressionAlgorithm) -> Result<PathBuf> {
    if !source.is_file() {
        return Err(AppError::BackupFailed(format!(
            "Source for compression is not a file: {}",
            source.display()
        )));
    }

    let dest = match algorithm {
        CompressionAlgorithm::None => return Ok(source.to_path_buf()),
        _ => append_extension(source, algorithm.extension()),
    };

    tracing::debug!(
        source = %source.display(),
        dest = %dest.display(),
        algorithm = %algorithm,
        "Compressing file"
    );

    let result = match algorithm {
        CompressionAlgorithm::Gzip => compress_gzip(source, &dest),
        CompressionAlgorithm::Zip => compress_zip(source, &dest),
        CompressionAlgorithm::None => Ok(()),
    };
    if let Err(err) = result {
        discard_partial(&dest);
        return Err(err);
    }

    Ok(dest)
}

/// Reverses [`compress_file`], writing the original bytes to `dest`.
pub fn decompress_file(
    source: &Path,
    algorithm: CompressionAlgorithm,
    dest: &Path,
) -> Result<PathBuf> {
    if !source.is_file() {
        return Err(AppError::RestoreFailed(format!(
            "Archive for decompression is not a file: {}",
            source.display()
        )));
    }

    tracing::debug!(
        source = %source.display(),
        dest = %dest.display(),
        algorithm = %algorithm,
        "Decompressing file"
    );

    let result = match algorithm {
        CompressionAlgorithm::None => std::fs::copy(source, dest).map(|_| ()).map_err(AppError::from),
        CompressionAlgorithm::Gzip => decompress_gzip(source, dest),
        CompressionAlgorithm::Zip => decompress_zip(source, dest),
    };
    if let Err(err) = result {
        discard_partial(dest);
        return Err(err);
    }

    Ok(dest.to_path_buf())
}

fn compress_gzip(source: &Path, dest: &Path) -> Result<()> {
    let mut input = BufReader::new(File::open(source)?);
    let output = BufWriter::new(File::create(dest)?);
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    let mut output = encoder.finish()?;
    output.flush()?;
    Ok(())
}

fn decompress_gzip(source: &Path, dest: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut output = BufWriter::new(File::create(dest)?);
    std::io::copy(&mut decoder, &mut output)?;
    output.flush()?;
    Ok(())
}

fn compress_zip(source: &Path, dest: &Path) -> Result<()> {
    let entry_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::BackupFailed(format!("Source has no file name: {}", source.display()))
        })?;
    let source_len = std::fs::metadata(source)?.len();

    let mut input = BufReader::new(File::open(source)?);
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source_len >= ZIP64_THRESHOLD);
    zip.start_file(entry_name, options)?;
    std::io::copy(&mut input, &mut zip)?;
    zip.finish()?;
    Ok(())
}

fn decompress_zip(source: &Path, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(source)?)?;
    if archive.len() != 1 {
        return Err(AppError::RestoreFailed(format!(
            "Expected a single entry in {}, found {}",
            source.display(),
            archive.len()
        )));
    }
    let mut entry = archive.by_index(0)?;
    let mut output = BufWriter::new(File::create(dest)?);
    std::io::copy(&mut entry, &mut output)?;
    output.flush()?;
    Ok(())
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(extension);
    PathBuf::from(name)
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

    fn sample_payload() -> Vec<u8> {
        (0..200_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect()
    }

    #[test]
    fn gzip_and_zip_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let payload = sample_payload();

        for algorithm in [CompressionAlgorithm::Gzip, CompressionAlgorithm::Zip] {
            let source = dir.path().join(format!("dump_{algorithm}.dump"));
            std::fs::write(&source, &payload)?;

            let compressed = compress_file(&source, algorithm)?;
            assert_ne!(compressed, source);
            assert!(compressed.to_string_lossy().ends_with(algorithm.extension()));
            assert!(std::fs::metadata(&compressed)?.len() < payload.len() as u64);

            let restored = dir.path().join(format!("restored_{algorithm}.dump"));
            decompress_file(&compressed, algorithm, &restored)?;
            assert_eq!(std::fs::read(&restored)?, payload);
        }
        Ok(())
    }

    #[test]
    fn none_passes_source_through() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("plain.dump");
        std::fs::write(&source, b"plain")?;

        assert_eq!(compress_file(&source, CompressionAlgorithm::None)?, source);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn empty_file_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("empty.dump");
        std::fs::write(&source, b"")?;

        let compressed = compress_file(&source, CompressionAlgorithm::Gzip)?;
        let restored = dir.path().join("empty.out");
        decompress_file(&compressed, CompressionAlgorithm::Gzip, &restored)?;
        assert!(std::fs::read(&restored)?.is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_gzip_leaves_no_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("bogus.gz");
        std::fs::write(&source, b"definitely not gzip")?;
        let dest = dir.path().join("bogus.out");

        assert!(decompress_file(&source, CompressionAlgorithm::Gzip, &dest).is_err());
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("gzip".parse::<CompressionAlgorithm>().ok(), Some(CompressionAlgorithm::Gzip));
        assert_eq!("ZIP".parse::<CompressionAlgorithm>().ok(), Some(CompressionAlgorithm::Zip));
        assert_eq!("none".parse::<CompressionAlgorithm>().ok(), Some(CompressionAlgorithm::None));
        assert!("lz4".parse::<CompressionAlgorithm>().is_err());
    }
}
