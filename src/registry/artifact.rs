//! GGUF artifact validation
//!
//! Cheap header checks run before the engine is asked to map a
//! multi-gigabyte file: a corrupt or truncated artifact should fail
//! here, not deep inside llama.cpp.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// GGUF magic bytes (little-endian "GGUF").
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a GGUF artifact: magic bytes 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported GGUF version {0} (supported: 2-3)")]
    UnsupportedVersion(u32),

    #[error("artifact truncated: {0} bytes is smaller than a GGUF header")]
    Truncated(u64),
}

/// Fields parsed from a GGUF file header.
#[derive(Debug, Clone)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Checks that `path` starts with a well-formed GGUF header and returns
/// the parsed fields.
pub fn validate_gguf(path: &Path) -> Result<GgufHeader, ArtifactError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < HEADER_LEN as u64 {
        return Err(ArtifactError::Truncated(file_len));
    }

    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)?;

    let magic = le_u32(&header[0..4]);
    if magic != GGUF_MAGIC {
        return Err(ArtifactError::BadMagic(magic));
    }

    let version = le_u32(&header[4..8]);
    if !(2..=3).contains(&version) {
        return Err(ArtifactError::UnsupportedVersion(version));
    }

    Ok(GgufHeader {
        version,
        tensor_count: le_u64(&header[8..16]),
        metadata_kv_count: le_u64(&header[16..24]),
    })
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_header(version: u32, tensors: u64, kv: u64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.write_all(&version.to_le_bytes()).unwrap();
        file.write_all(&tensors.to_le_bytes()).unwrap();
        file.write_all(&kv.to_le_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn valid_header_parses() {
        let file = write_header(3, 10, 5);
        let header = validate_gguf(file.path()).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.tensor_count, 10);
        assert_eq!(header.metadata_kv_count, 5);
    }

    #[test]
    fn version_two_is_accepted() {
        let file = write_header(2, 1, 1);
        assert_eq!(validate_gguf(file.path()).unwrap().version, 2);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 20]).unwrap();
        file.flush().unwrap();

        let err = validate_gguf(file.path());
        assert!(matches!(err, Err(ArtifactError::BadMagic(0xDEADBEEF))));
    }

    #[test]
    fn future_version_is_rejected() {
        let file = write_header(4, 1, 1);
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ArtifactError::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.flush().unwrap();

        assert!(matches!(
            validate_gguf(file.path()),
            Err(ArtifactError::Truncated(4))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_gguf(&dir.path().join("nope.gguf"));
        assert!(matches!(err, Err(ArtifactError::Io(_))));
    }
}
