//! Mapping log record format
//!
//! ```text
//! +------------------+
//! | Body Length      | (u32 LE)
//! +------------------+
//! | Kind             | (u8)
//! +------------------+
//! | Kind payload     | (length-prefixed strings/bytes, u64 LE ids)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 of kind + payload)
//! +------------------+
//! ```
//!
//! Records between two `Commit` records form one transaction. Replay keeps
//! only transactions whose `Commit` made it to disk.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crc32fast::Hasher;

use super::errors::{MappingError, MappingResult};

const KIND_BUCKET: u8 = 1;
const KIND_ROW_ID: u8 = 2;
const KIND_LOCATIONS: u8 = 3;
const KIND_LOCATION: u8 = 4;
const KIND_COMMIT: u8 = 5;

const FRAME_OVERHEAD: u64 = 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    /// Value namespace for a field
    Bucket { name: String },
    /// Value -> rowID assignment; `sequence` of the bucket becomes `id`
    RowId { bucket: String, key: Vec<u8>, id: u64 },
    /// Location namespace for an index
    Locations { name: String },
    Location {
        index: String,
        column: u64,
        location: Vec<u8>,
    },
    Commit,
}

pub(crate) fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

impl LogRecord {
    /// Appends the framed record to `out`
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        let mut body = Vec::with_capacity(32);
        match self {
            LogRecord::Bucket { name } => {
                body.push(KIND_BUCKET);
                put_bytes(&mut body, name.as_bytes());
            }
            LogRecord::RowId { bucket, key, id } => {
                body.push(KIND_ROW_ID);
                put_bytes(&mut body, bucket.as_bytes());
                put_bytes(&mut body, key);
                body.extend_from_slice(&id.to_le_bytes());
            }
            LogRecord::Locations { name } => {
                body.push(KIND_LOCATIONS);
                put_bytes(&mut body, name.as_bytes());
            }
            LogRecord::Location {
                index,
                column,
                location,
            } => {
                body.push(KIND_LOCATION);
                put_bytes(&mut body, index.as_bytes());
                body.extend_from_slice(&column.to_le_bytes());
                put_bytes(&mut body, location);
            }
            LogRecord::Commit => body.push(KIND_COMMIT),
        }

        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&compute_checksum(&body).to_le_bytes());
    }

    fn decode_body(body: &[u8], offset: u64) -> MappingResult<Self> {
        let mut r = BodyReader { body, pos: 0, offset };
        let record = match r.u8()? {
            KIND_BUCKET => LogRecord::Bucket { name: r.string()? },
            KIND_ROW_ID => LogRecord::RowId {
                bucket: r.string()?,
                key: r.bytes()?,
                id: r.u64()?,
            },
            KIND_LOCATIONS => LogRecord::Locations { name: r.string()? },
            KIND_LOCATION => LogRecord::Location {
                index: r.string()?,
                column: r.u64()?,
                location: r.bytes()?,
            },
            KIND_COMMIT => LogRecord::Commit,
            other => {
                return Err(MappingError::corruption(
                    offset,
                    format!("unknown record kind {}", other),
                ))
            }
        };
        if r.pos != body.len() {
            return Err(MappingError::corruption(offset, "trailing bytes in record body"));
        }
        Ok(record)
    }
}

struct BodyReader<'a> {
    body: &'a [u8],
    pos: usize,
    offset: u64,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> MappingResult<&'a [u8]> {
        if self.body.len() - self.pos < n {
            return Err(MappingError::corruption(self.offset, "record body too short"));
        }
        let slice = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> MappingResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> MappingResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes(&mut self) -> MappingResult<Vec<u8>> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        let len = u32::from_le_bytes(raw) as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> MappingResult<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|e| MappingError::corruption(self.offset, format!("invalid UTF-8: {}", e)))
    }
}

/// Committed content of a mapping log
#[derive(Debug, Default)]
pub(crate) struct Replayed {
    /// Records of committed transactions, in log order, without markers
    pub records: Vec<LogRecord>,
    /// Byte length of the committed prefix; anything after it is discarded
    pub committed_len: u64,
}

/// Whether `bytes` holds a complete, valid commit frame
fn contains_commit_frame(bytes: &[u8]) -> bool {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + 1);
    LogRecord::Commit.encode_into(&mut frame);
    bytes.windows(frame.len()).any(|w| w == frame.as_slice())
}

/// Replays a mapping log.
///
/// A missing file is an empty log. A frame that runs past the end of the
/// file, or a final frame whose checksum fails, is a torn write and ends the
/// log. A checksum failure followed by more data is corruption, and so is a
/// frame length running past the end while a later commit is still on disk.
pub(crate) fn replay(path: &Path) -> MappingResult<Replayed> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Replayed::default()),
        Err(e) => {
            return Err(MappingError::io(
                format!("Failed to open mapping log: {}", path.display()),
                e,
            ))
        }
    };
    let file_size = file
        .metadata()
        .map_err(|e| MappingError::io("Failed to read mapping log metadata", e))?
        .len();

    let mut reader = BufReader::new(file);
    let mut replayed = Replayed::default();
    let mut pending = Vec::new();
    let mut offset = 0u64;

    while offset < file_size {
        let remaining = file_size - offset;
        if remaining < FRAME_OVERHEAD {
            break;
        }

        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .map_err(|e| MappingError::io("Failed to read mapping record length", e))?;
        let body_len = u32::from_le_bytes(len_buf) as u64;
        let frame_len = FRAME_OVERHEAD + body_len;
        if frame_len > remaining {
            let mut rest = Vec::new();
            reader
                .read_to_end(&mut rest)
                .map_err(|e| MappingError::io("Failed to read mapping log tail", e))?;
            if contains_commit_frame(&rest) {
                return Err(MappingError::corruption(
                    offset,
                    format!("record length {} runs past a committed transaction", body_len),
                ));
            }
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        reader
            .read_exact(&mut body)
            .map_err(|e| MappingError::io("Failed to read mapping record body", e))?;
        let mut crc_buf = [0u8; 4];
        reader
            .read_exact(&mut crc_buf)
            .map_err(|e| MappingError::io("Failed to read mapping record checksum", e))?;

        if compute_checksum(&body) != u32::from_le_bytes(crc_buf) {
            if offset + frame_len == file_size {
                break;
            }
            return Err(MappingError::corruption(offset, "checksum mismatch"));
        }

        match LogRecord::decode_body(&body, offset)? {
            LogRecord::Commit => {
                replayed.records.append(&mut pending);
                replayed.committed_len = offset + frame_len;
            }
            record => pending.push(record),
        }
        offset += frame_len;
    }

    Ok(replayed)
}
