//! A bitmap field: rowID -> set of columnIDs
//!
//! On-disk layout of `<field>.bitmap`:
//!
//! ```text
//! "BITF" | version (u8) | row count (u32 LE)
//! repeated: row id (u64 LE) | length (u32 LE) | RoaringTreemap bytes
//! checksum (u32 LE, CRC32 of everything before it)
//! ```
//!
//! Every import rewrites the file through a temp file and rename.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crc32fast::Hasher;
use roaring::RoaringTreemap;

use super::errors::{BitmapError, BitmapResult};

const MAGIC: &[u8; 4] = b"BITF";
const VERSION: u8 = 1;

#[derive(Debug)]
pub struct Field {
    name: String,
    path: PathBuf,
    rows: RwLock<BTreeMap<u64, RoaringTreemap>>,
}

impl Field {
    /// An empty field that persists to `path`
    pub(crate) fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loads a persisted field
    pub(crate) fn load(name: impl Into<String>, path: impl Into<PathBuf>) -> BitmapResult<Self> {
        let path = path.into();
        let data = fs::read(&path).map_err(|e| {
            BitmapError::io(format!("Failed to read bitmap field: {}", path.display()), e)
        })?;
        let rows = decode(&path, &data)?;
        Ok(Self {
            name: name.into(),
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, RoaringTreemap>> {
        self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, RoaringTreemap>> {
        self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets bit `(rows[i], cols[i])` for every i and persists the field.
    ///
    /// Empty input is a no-op.
    pub fn import_bits(&self, rows: &[u64], cols: &[u64]) -> BitmapResult<()> {
        if rows.len() != cols.len() {
            return Err(BitmapError::LengthMismatch {
                rows: rows.len(),
                cols: cols.len(),
            });
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut guard = self.write();
        for (row, col) in rows.iter().zip(cols) {
            guard.entry(*row).or_default().insert(*col);
        }
        self.persist(&guard)
    }

    /// Columns set in `row`; an unknown row is empty
    pub fn row(&self, row: u64) -> RoaringTreemap {
        self.read().get(&row).cloned().unwrap_or_default()
    }

    /// Union of every row in `ids`
    pub fn union_rows(&self, ids: impl IntoIterator<Item = u64>) -> RoaringTreemap {
        let guard = self.read();
        let mut all = RoaringTreemap::new();
        for id in ids {
            if let Some(bits) = guard.get(&id) {
                all |= bits;
            }
        }
        all
    }

    pub(crate) fn persist_empty(&self) -> BitmapResult<()> {
        let guard = self.read();
        self.persist(&guard)
    }

    fn persist(&self, rows: &BTreeMap<u64, RoaringTreemap>) -> BitmapResult<()> {
        let data = encode(rows)
            .map_err(|e| BitmapError::io(format!("Failed to encode field {}", self.name), e))?;
        write_atomic(&self.path, &data)
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn encode(rows: &BTreeMap<u64, RoaringTreemap>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    for (id, bits) in rows {
        let mut raw = Vec::with_capacity(bits.serialized_size());
        bits.serialize_into(&mut raw)?;
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        buf.extend_from_slice(&raw);
    }
    let crc = checksum(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

fn decode(path: &Path, data: &[u8]) -> BitmapResult<BTreeMap<u64, RoaringTreemap>> {
    const HEADER: usize = 4 + 1 + 4;
    if data.len() < HEADER + 4 {
        return Err(BitmapError::corruption(path, "file too short"));
    }

    let (body, trailer) = data.split_at(data.len() - 4);
    let mut stored = [0u8; 4];
    stored.copy_from_slice(trailer);
    if checksum(body) != u32::from_le_bytes(stored) {
        return Err(BitmapError::corruption(path, "checksum mismatch"));
    }
    if &body[..4] != MAGIC {
        return Err(BitmapError::corruption(path, "invalid magic"));
    }
    if body[4] != VERSION {
        return Err(BitmapError::corruption(
            path,
            format!("unsupported version {}", body[4]),
        ));
    }

    let mut count_raw = [0u8; 4];
    count_raw.copy_from_slice(&body[5..9]);
    let count = u32::from_le_bytes(count_raw);

    let mut rows = BTreeMap::new();
    let mut pos = HEADER;
    for _ in 0..count {
        if body.len() - pos < 12 {
            return Err(BitmapError::corruption(path, "truncated row header"));
        }
        let mut id_raw = [0u8; 8];
        id_raw.copy_from_slice(&body[pos..pos + 8]);
        let mut len_raw = [0u8; 4];
        len_raw.copy_from_slice(&body[pos + 8..pos + 12]);
        pos += 12;

        let len = u32::from_le_bytes(len_raw) as usize;
        if body.len() - pos < len {
            return Err(BitmapError::corruption(path, "truncated row bitmap"));
        }
        let bits = RoaringTreemap::deserialize_from(&body[pos..pos + len])
            .map_err(|e| BitmapError::corruption(path, format!("invalid row bitmap: {}", e)))?;
        pos += len;
        rows.insert(u64::from_le_bytes(id_raw), bits);
    }

    if pos != body.len() {
        return Err(BitmapError::corruption(path, "trailing bytes"));
    }
    Ok(rows)
}

/// temp file, fsync, rename, fsync directory
fn write_atomic(path: &Path, data: &[u8]) -> BitmapResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| {
            BitmapError::io(format!("Failed to create {}", tmp.display()), e)
        })?;
        file.write_all(data)
            .map_err(|e| BitmapError::io(format!("Failed to write {}", tmp.display()), e))?;
        file.sync_all()
            .map_err(|e| BitmapError::io(format!("Failed to fsync {}", tmp.display()), e))?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        BitmapError::io(format!("Failed to rename {} into place", tmp.display()), e)
    })?;
    if let Some(parent) = path.parent() {
        OpenOptions::new()
            .read(true)
            .open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| {
                BitmapError::io(format!("Failed to fsync {}", parent.display()), e)
            })?;
    }
    Ok(())
}
