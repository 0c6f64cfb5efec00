//! Binary codec for storage entries.
//!
//! All data is serialized with:
//! - JSON for data (compatible with existing serde attributes)
//! - Length-prefixed format for framing
//! - CRC32 checksum for corruption detection
//! - Version byte for forward compatibility

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes to identify dedupkit files.
pub const MAGIC: [u8; 4] = *b"DDUP";

/// Size of the file header written by [`write_header`].
pub const HEADER_LEN: u64 = 5;

/// Sanity limit for a single frame (100 MB).
const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// Serializes a value to bytes with checksum.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    if data.len() > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {} exceeds maximum {MAX_ENTRY_SIZE}", data.len()),
        ));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "entry length overflows u32"))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Deserializes a value from bytes, verifying checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short
/// - `InvalidData` if the checksum fails, the version is unsupported, or
///   deserialization fails
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "unsupported codec version: {} (expected {CODEC_VERSION})",
                version[0]
            ),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"
            ),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_detects_corruption() {
        let value = "test data".to_string();
        let mut encoded = encode(&value).unwrap();

        // Corrupt a byte in the data section
        encoded[7] ^= 0xFF;

        let mut cursor = Cursor::new(encoded);
        let err = decode::<String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_short_frame_is_eof() {
        let encoded = encode(&"cut short".to_string()).unwrap();
        let mut cursor = Cursor::new(encoded[..encoded.len() - 2].to_vec());
        let err = decode::<String>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_entry() {
        // Craft a malicious header claiming huge size
        let mut bad_data = vec![CODEC_VERSION];
        bad_data.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let mut cursor = Cursor::new(bad_data);
        let result: IoResult<String> = decode(&mut cursor);

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_header(&mut cursor).unwrap(), CODEC_VERSION);
    }

    #[test]
    fn test_rejects_foreign_header() {
        let mut cursor = Cursor::new(b"SQLT\x01".to_vec());
        assert!(read_header(&mut cursor).is_err());
    }

    #[test]
    fn test_merge_entry_decodes() {
        use crate::entity::EntityId;
        use crate::storage::index::MergeChange;
        use crate::storage::persistent::wal::{WalEntry, WalEntryKind};
        use crate::usage::RelationId;
        use chrono::Utc;

        let change = MergeChange {
            keep_id: EntityId::new(),
            remove_ids: vec![EntityId::new(), EntityId::new()],
            reassigned: vec![RelationId::new()],
            at: Utc::now(),
        };
        let entry = WalEntry {
            sequence: 7,
            timestamp: Utc::now(),
            kind: WalEntryKind::Merge(change.clone()),
        };

        let mut cursor = Cursor::new(encode(&entry).unwrap());
        let decoded: WalEntry = decode(&mut cursor).unwrap();

        assert_eq!(decoded.sequence, 7);
        assert!(matches!(decoded.kind, WalEntryKind::Merge(c) if c == change));
    }
}
