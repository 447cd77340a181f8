//! Filesystem utility functions
//!
//! Temp-file-plus-durable-rename writes, gzip helpers and content
//! checksumming. Every on-disk mutation in the engine goes through
//! [`atomic_write`] so a concurrent reader never observes a partial file.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use super::error::{ConfigError, Result};

/// Filename suffix recognized as gzip-compressed content.
pub const GZIP_SUFFIX: &str = ".gz";

/// Return the sibling temp path used while writing `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".tmp");
    target.with_file_name(name)
}

/// Write `bytes` to `target` atomically.
///
/// The content is written to a sibling temp file in the same directory,
/// synced, and renamed over the target. The rename is what makes the write
/// visible, so readers see either the old file or the new one, never a mix.
pub fn atomic_write(target: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path_for(target);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    Ok(())
}

/// Read a file, transparently decompressing if its name ends in `.gz`.
pub fn read_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let raw = fs::read(path)?;
    if path
        .to_string_lossy()
        .ends_with(GZIP_SUFFIX)
    {
        gunzip(&raw)
    } else {
        Ok(raw)
    }
}

/// Gzip-compress a byte buffer.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip byte buffer.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ConfigError::Malformed(format!("gzip decode failed: {}", e)))?;
    Ok(out)
}

/// SHA-256 digest of a byte buffer, rendered as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// File modification time rendered as unix milliseconds.
pub fn mtime_millis(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::Io(e),
        })?;
    let mtime = meta
        .modified()
        .map_err(ConfigError::Io)?;
    let millis = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_roundtrip() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");

        atomic_write(&target, b"hello").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"hello");

        // Overwrite replaces the whole content
        atomic_write(&target, b"world").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"world");

        // No temp file left behind
        assert!(!temp_path_for(&target).exists());
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"a=1\nb=2\n".repeat(100);
        let compressed = gzip(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(gunzip(&compressed).unwrap(), data);
    }

    #[test]
    fn test_read_maybe_gzip() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let zipped = dir.path().join("zipped.txt.gz");

        fs::write(&plain, b"plain content").unwrap();
        fs::write(&zipped, gzip(b"zipped content").unwrap()).unwrap();

        assert_eq!(read_maybe_gzip(&plain).unwrap(), b"plain content");
        assert_eq!(read_maybe_gzip(&zipped).unwrap(), b"zipped content");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_maybe_gzip(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_sha256_hex() {
        // Known digest of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
