//! Canonical binary encoding of index keys
//!
//! ```text
//! +-----+------------------------------------------+
//! | tag | payload                                  |
//! +-----+------------------------------------------+
//!  u8    Null:      (empty)
//!        Bool:      u8 (0 | 1)
//!        Int32:     i32 LE      Int64:  i64 LE
//!        UInt32:    u32 LE      UInt64: u64 LE
//!        Float64:   f64 bits LE (-0.0 stored as 0.0)
//!        String:    u32 LE length + UTF-8 bytes
//!        Timestamp: i64 LE seconds + u32 LE nanoseconds (UTC)
//!        Bytes:     u32 LE length + bytes
//!        List:      u32 LE count + encoded elements
//! ```
//!
//! Every payload is self-delimiting, so list elements need no framing and
//! equal keys always produce identical bytes.

use chrono::{TimeZone, Utc};

use super::errors::{KeyError, KeyResult};
use super::IndexKey;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_UINT32: u8 = 4;
const TAG_UINT64: u8 = 5;
const TAG_FLOAT64: u8 = 6;
const TAG_STRING: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;
const TAG_BYTES: u8 = 9;
const TAG_LIST: u8 = 10;

pub(super) fn encode_into(key: &IndexKey, buf: &mut Vec<u8>) {
    match key {
        IndexKey::Null => buf.push(TAG_NULL),
        IndexKey::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        IndexKey::Int32(v) => {
            buf.push(TAG_INT32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        IndexKey::Int64(v) => {
            buf.push(TAG_INT64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        IndexKey::UInt32(v) => {
            buf.push(TAG_UINT32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        IndexKey::UInt64(v) => {
            buf.push(TAG_UINT64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        IndexKey::Float64(v) => {
            buf.push(TAG_FLOAT64);
            let canonical = if *v == 0.0 { 0.0f64 } else { *v };
            buf.extend_from_slice(&canonical.to_bits().to_le_bytes());
        }
        IndexKey::String(s) => {
            buf.push(TAG_STRING);
            put_len_prefixed(buf, s.as_bytes());
        }
        IndexKey::Timestamp(ts) => {
            buf.push(TAG_TIMESTAMP);
            buf.extend_from_slice(&ts.timestamp().to_le_bytes());
            buf.extend_from_slice(&ts.timestamp_subsec_nanos().to_le_bytes());
        }
        IndexKey::Bytes(b) => {
            buf.push(TAG_BYTES);
            put_len_prefixed(buf, b);
        }
        IndexKey::List(items) => {
            buf.push(TAG_LIST);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_into(item, buf);
            }
        }
    }
}

fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

pub(super) fn decode(bytes: &[u8]) -> KeyResult<IndexKey> {
    let mut cursor = Cursor { data: bytes, pos: 0 };
    let key = cursor.read_key()?;
    if cursor.pos != bytes.len() {
        return Err(KeyError::Decode(format!(
            "{} trailing bytes after key",
            bytes.len() - cursor.pos
        )));
    }
    Ok(key)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> KeyResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                KeyError::Decode(format!(
                    "need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.data.len() - self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> KeyResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> KeyResult<usize> {
        Ok(u32::from_le_bytes(self.array()?) as usize)
    }

    fn read_key(&mut self) -> KeyResult<IndexKey> {
        let [tag] = self.array::<1>()?;
        let key = match tag {
            TAG_NULL => IndexKey::Null,
            TAG_BOOL => match self.array::<1>()? {
                [0] => IndexKey::Bool(false),
                [1] => IndexKey::Bool(true),
                [b] => return Err(KeyError::Decode(format!("invalid bool byte {}", b))),
            },
            TAG_INT32 => IndexKey::Int32(i32::from_le_bytes(self.array()?)),
            TAG_INT64 => IndexKey::Int64(i64::from_le_bytes(self.array()?)),
            TAG_UINT32 => IndexKey::UInt32(u32::from_le_bytes(self.array()?)),
            TAG_UINT64 => IndexKey::UInt64(u64::from_le_bytes(self.array()?)),
            TAG_FLOAT64 => IndexKey::Float64(f64::from_bits(u64::from_le_bytes(self.array()?))),
            TAG_STRING => {
                let len = self.read_len()?;
                let raw = self.take(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| KeyError::Decode(format!("invalid UTF-8: {}", e)))?;
                IndexKey::String(s.to_string())
            }
            TAG_TIMESTAMP => {
                let secs = i64::from_le_bytes(self.array()?);
                let nanos = u32::from_le_bytes(self.array()?);
                let ts = Utc.timestamp_opt(secs, nanos).single().ok_or_else(|| {
                    KeyError::Decode(format!("timestamp out of range: {}s {}ns", secs, nanos))
                })?;
                IndexKey::Timestamp(ts)
            }
            TAG_BYTES => {
                let len = self.read_len()?;
                IndexKey::Bytes(self.take(len)?.to_vec())
            }
            TAG_LIST => {
                let count = self.read_len()?;
                // every element needs at least its tag byte
                if count > self.data.len() - self.pos {
                    return Err(KeyError::Decode(format!("list count {} exceeds input", count)));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_key()?);
                }
                IndexKey::List(items)
            }
            other => return Err(KeyError::Decode(format!("unknown tag {}", other))),
        };
        Ok(key)
    }
}
