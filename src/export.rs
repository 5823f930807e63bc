//! Byte encodings for export record lists.
//!
//! The ledger does no I/O of its own; a persistence layer stores these bytes
//! and hands the decoded records back to `EventStore::load_export`, which
//! re-verifies the chain. The framed form adds a CRC32 so storage corruption
//! is reported separately from tampering.

use crate::error::{LedgerError, Result};
use crate::types::ExportRecord;

/// Magic bytes for a framed export.
const FRAME_MAGIC: &[u8; 4] = b"ALG\0";

/// Current frame format version.
const FRAME_VERSION: u8 = 1;

/// magic + version + body length
const FRAME_HEADER_SIZE: usize = 4 + 1 + 4;

/// Encode records as a JSON array.
pub fn to_json(records: &[ExportRecord]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(records)?)
}

/// Decode records from a JSON array.
pub fn from_json(bytes: &[u8]) -> Result<Vec<ExportRecord>> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::Deserialization(e.to_string()))
}

/// Encode records as a framed MessagePack body.
///
/// Layout: magic, version byte, u32 LE body length, body, u32 LE CRC32 of body.
pub fn encode_frame(records: &[ExportRecord]) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(records)?;
    let len = u32::try_from(body.len())
        .map_err(|_| LedgerError::Serialization("export too large to frame".into()))?;

    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len() + 4);
    out.extend_from_slice(FRAME_MAGIC);
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(out)
}

/// Decode a framed export, checking magic, version, length and checksum.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<ExportRecord>> {
    if bytes.len() < FRAME_HEADER_SIZE + 4 {
        return Err(LedgerError::Corruption("export frame truncated".into()));
    }
    if &bytes[0..4] != FRAME_MAGIC {
        return Err(LedgerError::Corruption("invalid export frame magic".into()));
    }
    if bytes[4] != FRAME_VERSION {
        return Err(LedgerError::Corruption(format!(
            "unsupported export frame version: {}",
            bytes[4]
        )));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[5..9]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if bytes.len() != FRAME_HEADER_SIZE + len + 4 {
        return Err(LedgerError::Corruption(format!(
            "export frame length mismatch: header says {}, frame holds {}",
            len,
            bytes.len().saturating_sub(FRAME_HEADER_SIZE + 4)
        )));
    }

    let body = &bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[FRAME_HEADER_SIZE + len..]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(LedgerError::Corruption(format!(
            "export frame checksum mismatch: expected {:08x}, got {:08x}",
            stored, computed
        )));
    }

    Ok(rmp_serde::from_slice(body)?)
}
