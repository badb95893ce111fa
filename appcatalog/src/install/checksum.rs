//! SHA-256 checksums for downloaded files.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::{InstallError, InstallResult};

/// Read buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's contents.
pub fn calculate_file_checksum(path: &Path) -> InstallResult<String> {
    let read_err = |e| InstallError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(read_err)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer).map_err(read_err)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless `path` hashes to `expected` (hex, any case).
pub fn verify_checksum(path: &Path, expected: &str) -> InstallResult<()> {
    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(InstallError::ChecksumMismatch {
            filename: file_name(path),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Fail unless `path` is exactly `expected_size` bytes and hashes to
/// `expected_hash`.
pub fn verify_download(path: &Path, expected_size: u64, expected_hash: &str) -> InstallResult<()> {
    let actual = fs::metadata(path)
        .map_err(|e| InstallError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?
        .len();
    if actual != expected_size {
        return Err(InstallError::SizeMismatch {
            filename: file_name(path),
            expected: expected_size,
            actual,
        });
    }
    verify_checksum(path, expected_hash)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Whether `path` exists and hashes to `expected`.
pub fn file_matches_hash(path: &Path, expected: &str) -> bool {
    calculate_file_checksum(path)
        .map(|actual| actual.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}
