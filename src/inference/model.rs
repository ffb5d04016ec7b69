//! Model file validation
//!
//! Sniffs the GGUF header before the engine ever touches a file, so an
//! unreadable or corrupt path fails fast instead of inside llama.cpp.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// Fixed-size part of the GGUF header:
/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8).
const HEADER_LEN: usize = 24;

/// Errors that can occur while validating a model file
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    #[error("Invalid GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Fixed-size fields of a GGUF file header
#[derive(Debug, Clone)]
pub struct GgufHeader {
    /// GGUF format version
    pub version: u32,
    /// Number of tensors in the model
    pub tensor_count: u64,
    /// Number of metadata key-value pairs
    pub metadata_kv_count: u64,
}

/// Checks that `path` starts with a well-formed GGUF header.
///
/// Only the fixed 24-byte prefix is read; full metadata parsing is the
/// engine's job. GGUF v2 and v3 are accepted.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ModelError::FileTooSmall
        } else {
            ModelError::FileOpen(e)
        }
    })?;

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic(magic));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !(2..=3).contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut tensor_count = [0u8; 8];
    tensor_count.copy_from_slice(&header[8..16]);
    let mut metadata_kv_count = [0u8; 8];
    metadata_kv_count.copy_from_slice(&header[16..24]);

    Ok(GgufHeader {
        version,
        tensor_count: u64::from_le_bytes(tensor_count),
        metadata_kv_count: u64::from_le_bytes(metadata_kv_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_gguf_header(magic: u32, version: u32) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();

        file.write_all(&magic.to_le_bytes()).unwrap();
        file.write_all(&version.to_le_bytes()).unwrap();
        file.write_all(&10u64.to_le_bytes()).unwrap(); // tensor_count
        file.write_all(&5u64.to_le_bytes()).unwrap(); // metadata_kv_count
        file.flush().unwrap();

        file
    }

    #[test]
    fn test_validate_gguf_valid() {
        let file = write_gguf_header(GGUF_MAGIC, 3);
        let header = validate_gguf(file.path()).unwrap();

        assert_eq!(header.version, 3);
        assert_eq!(header.tensor_count, 10);
        assert_eq!(header.metadata_kv_count, 5);
    }

    #[test]
    fn test_validate_gguf_accepts_v2() {
        let file = write_gguf_header(GGUF_MAGIC, 2);
        assert_eq!(validate_gguf(file.path()).unwrap().version, 2);
    }

    #[test]
    fn test_validate_gguf_invalid_magic() {
        let file = write_gguf_header(0xDEADBEEF, 3);
        let result = validate_gguf(file.path());
        assert!(matches!(result, Err(ModelError::InvalidMagic(0xDEADBEEF))));
    }

    #[test]
    fn test_validate_gguf_unsupported_version() {
        let file = write_gguf_header(GGUF_MAGIC, 1);
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ModelError::UnsupportedVersion(1))
        ));

        let file = write_gguf_header(GGUF_MAGIC, 4);
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ModelError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn test_validate_gguf_file_too_small() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();

        // Magic only, no rest of the header
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.flush().unwrap();

        let result = validate_gguf(file.path());
        assert!(matches!(result, Err(ModelError::FileTooSmall)));
    }

    #[test]
    fn test_validate_gguf_missing_file() {
        let result = validate_gguf("/nonexistent/model.gguf");
        assert!(matches!(result, Err(ModelError::FileOpen(_))));
    }
}
