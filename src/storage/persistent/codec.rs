//! Record framing for the operation log.
//!
//! ```text
//! file:   [b"KDOC"][format: u8][record]...
//! record: [len: u32 LE][crc32: u32 LE][payload: len bytes of JSON]
//! ```
//!
//! The checksum is computed over the format byte, the length field and the
//! payload. A damaged length or a record spliced in from a log of another
//! format fails verification instead of decoding as garbage.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Log format written by this version.
const FORMAT: u8 = 2;

/// Magic bytes identifying kyrodoc log files.
pub const MAGIC: [u8; 4] = *b"KDOC";

/// Length of the file header in bytes.
pub const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

/// Largest payload accepted when decoding (64 MiB).
const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

const FRAME_OVERHEAD: usize = 8;

fn invalid(message: impl Into<String>) -> IoError {
    IoError::new(ErrorKind::InvalidData, message.into())
}

fn checksum(len: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FORMAT]);
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

fn read_u32(reader: &mut impl Read) -> IoResult<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Frames `value` as one log record.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(value).map_err(|e| invalid(format!("cannot serialize record: {e}")))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD)
        .ok_or_else(|| invalid(format!("record of {} bytes exceeds the frame limit", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(len, &payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads and verifies one framed record.
///
/// # Errors
/// - `UnexpectedEof` if the record is truncated
/// - `InvalidData` on an oversized length, checksum mismatch or bad payload
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let len = read_u32(reader)?;
    if len > MAX_PAYLOAD {
        return Err(invalid(format!("record length {len} exceeds maximum {MAX_PAYLOAD}")));
    }
    let stored = read_u32(reader)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;

    let computed = checksum(len, &payload);
    if stored != computed {
        return Err(invalid(format!(
            "checksum mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }
    serde_json::from_slice(&payload).map_err(|e| invalid(format!("cannot deserialize record: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT])
}

/// Reads the file header and checks that this version can replay the log.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!("not a kyrodoc log: header {:?}", &header[..4])));
    }
    if header[4] != FORMAT {
        return Err(invalid(format!(
            "unsupported log format {} (expected {FORMAT})",
            header[4]
        )));
    }
    Ok(())
}
