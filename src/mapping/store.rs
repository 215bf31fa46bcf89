//! Mapping store
//!
//! One log file per partition holds two namespaces:
//!
//! - value buckets: encoded key -> rowID, one bucket per bitmap field
//! - location tables: columnID -> opaque row location, one per engine index
//!
//! The committed state lives in memory while at least one client has the
//! mapping open and is rebuilt from the log on first open. Writes go to a
//! transaction overlay and reach the log only on `commit`.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::errors::{MappingError, MappingResult};
use super::record::{self, LogRecord};

#[derive(Debug, Default, Clone)]
struct Bucket {
    ids: BTreeMap<Vec<u8>, u64>,
    /// Highest rowID handed out, rowIDs start at 1
    sequence: u64,
}

#[derive(Debug, Default)]
struct Tables {
    buckets: HashMap<String, Bucket>,
    locations: HashMap<String, BTreeMap<u64, Vec<u8>>>,
}

impl Tables {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Bucket { name } => {
                self.buckets.entry(name).or_default();
            }
            LogRecord::RowId { bucket, key, id } => {
                let b = self.buckets.entry(bucket).or_default();
                b.sequence = b.sequence.max(id);
                b.ids.insert(key, id);
            }
            LogRecord::Locations { name } => {
                self.locations.entry(name).or_default();
            }
            LogRecord::Location {
                index,
                column,
                location,
            } => {
                self.locations.entry(index).or_default().insert(column, location);
            }
            LogRecord::Commit => {}
        }
    }
}

#[derive(Debug, Default)]
struct Transaction {
    /// Replace all committed content on the first commit
    truncate: bool,
    records: Vec<LogRecord>,
    overlay: Tables,
}

#[derive(Debug, Default)]
struct MappingState {
    clients: usize,
    tables: Option<Tables>,
    committed_len: u64,
    txn: Option<Transaction>,
}

/// Durable value <-> rowID and columnID -> location mapping of one partition
#[derive(Debug)]
pub struct Mapping {
    path: PathBuf,
    state: Mutex<MappingState>,
}

impl Mapping {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(MappingState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, MappingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, state: &mut MappingState) -> MappingResult<()> {
        if state.tables.is_none() {
            let replayed = record::replay(&self.path)?;
            let mut tables = Tables::default();
            for r in replayed.records {
                tables.apply(r);
            }
            state.tables = Some(tables);
            state.committed_len = replayed.committed_len;
        }
        Ok(())
    }

    /// Registers a reader, loading the log on first use
    pub fn open(&self) -> MappingResult<()> {
        let mut state = self.lock();
        self.load(&mut state)?;
        state.clients += 1;
        Ok(())
    }

    /// Registers a writer and starts a transaction.
    ///
    /// With `truncate` the first commit replaces everything committed so far;
    /// until then readers keep seeing the previous content.
    pub fn open_create(&self, truncate: bool) -> MappingResult<()> {
        let mut state = self.lock();
        if state.txn.is_some() {
            return Err(MappingError::TransactionActive);
        }
        self.load(&mut state)?;
        state.clients += 1;
        state.txn = Some(Transaction {
            truncate,
            ..Transaction::default()
        });
        Ok(())
    }

    /// Releases one client. The last close drops the in-memory state and
    /// discards any transaction still open.
    pub fn close(&self) {
        let mut state = self.lock();
        state.clients = state.clients.saturating_sub(1);
        if state.clients == 0 {
            state.tables = None;
            state.txn = None;
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().clients > 0
    }

    /// Returns the rowID of `key` in `field`, assigning the next one if the
    /// value is new. Requires an open transaction.
    pub fn row_id(&self, field: &str, key: &[u8]) -> MappingResult<u64> {
        let mut guard = self.lock();
        let MappingState { tables, txn, .. } = &mut *guard;
        let tables = tables.as_ref().ok_or(MappingError::NotOpen)?;
        let txn = txn.as_mut().ok_or(MappingError::NoTransaction)?;

        let base = if txn.truncate {
            None
        } else {
            tables.buckets.get(field)
        };

        if let Some(id) = txn.overlay.buckets.get(field).and_then(|b| b.ids.get(key)) {
            return Ok(*id);
        }
        if let Some(id) = base.and_then(|b| b.ids.get(key)) {
            return Ok(*id);
        }

        if !txn.overlay.buckets.contains_key(field) {
            if base.is_none() {
                txn.records.push(LogRecord::Bucket {
                    name: field.to_string(),
                });
            }
            txn.overlay.buckets.insert(
                field.to_string(),
                Bucket {
                    ids: BTreeMap::new(),
                    sequence: base.map(|b| b.sequence).unwrap_or(0),
                },
            );
        }

        let bucket = txn
            .overlay
            .buckets
            .get_mut(field)
            .ok_or_else(|| MappingError::BucketNotFound(field.to_string()))?;
        bucket.sequence += 1;
        let id = bucket.sequence;
        bucket.ids.insert(key.to_vec(), id);
        txn.records.push(LogRecord::RowId {
            bucket: field.to_string(),
            key: key.to_vec(),
            id,
        });
        Ok(id)
    }

    /// Makes sure the value bucket of `field` exists after commit
    pub fn create_bucket(&self, field: &str) -> MappingResult<()> {
        let mut guard = self.lock();
        let MappingState { tables, txn, .. } = &mut *guard;
        let tables = tables.as_ref().ok_or(MappingError::NotOpen)?;
        let txn = txn.as_mut().ok_or(MappingError::NoTransaction)?;

        let committed = !txn.truncate && tables.buckets.contains_key(field);
        if !committed && !txn.overlay.buckets.contains_key(field) {
            txn.overlay
                .buckets
                .insert(field.to_string(), Bucket::default());
            txn.records.push(LogRecord::Bucket {
                name: field.to_string(),
            });
        }
        Ok(())
    }

    /// Makes sure the location table of `index` exists after commit
    pub fn create_locations(&self, index: &str) -> MappingResult<()> {
        let mut guard = self.lock();
        let MappingState { tables, txn, .. } = &mut *guard;
        let tables = tables.as_ref().ok_or(MappingError::NotOpen)?;
        let txn = txn.as_mut().ok_or(MappingError::NoTransaction)?;

        let committed = !txn.truncate && tables.locations.contains_key(index);
        if !committed && !txn.overlay.locations.contains_key(index) {
            txn.overlay.locations.insert(index.to_string(), BTreeMap::new());
            txn.records.push(LogRecord::Locations {
                name: index.to_string(),
            });
        }
        Ok(())
    }

    pub fn put_location(&self, index: &str, column: u64, location: &[u8]) -> MappingResult<()> {
        let mut guard = self.lock();
        let MappingState { tables, txn, .. } = &mut *guard;
        let tables = tables.as_ref().ok_or(MappingError::NotOpen)?;
        let txn = txn.as_mut().ok_or(MappingError::NoTransaction)?;

        let committed = !txn.truncate && tables.locations.contains_key(index);
        if !committed && !txn.overlay.locations.contains_key(index) {
            txn.records.push(LogRecord::Locations {
                name: index.to_string(),
            });
        }
        txn.overlay
            .locations
            .entry(index.to_string())
            .or_default()
            .insert(column, location.to_vec());
        txn.records.push(LogRecord::Location {
            index: index.to_string(),
            column,
            location: location.to_vec(),
        });
        Ok(())
    }

    /// Writes the transaction to the log and fsyncs it.
    ///
    /// With `continues` a new transaction starts right away for the next
    /// batch; otherwise the writer is done. A failed commit discards the
    /// transaction.
    pub fn commit(&self, continues: bool) -> MappingResult<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.tables.is_none() {
            return Err(MappingError::NotOpen);
        }
        let txn = state.txn.take().ok_or(MappingError::NoTransaction)?;

        let start = if txn.truncate { 0 } else { state.committed_len };
        let mut buf = Vec::new();
        for r in &txn.records {
            r.encode_into(&mut buf);
        }
        LogRecord::Commit.encode_into(&mut buf);
        self.append(start, &buf)?;

        let tables = state.tables.get_or_insert_with(Tables::default);
        if txn.truncate {
            *tables = Tables::default();
        }
        for r in txn.records {
            tables.apply(r);
        }
        state.committed_len = start + buf.len() as u64;

        if continues {
            state.txn = Some(Transaction::default());
        }
        Ok(())
    }

    /// Discards the open transaction, if any
    pub fn rollback(&self) {
        self.lock().txn = None;
    }

    fn append(&self, start: u64, bytes: &[u8]) -> MappingResult<()> {
        let existed = self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                MappingError::io(
                    format!("Failed to open mapping log: {}", self.path.display()),
                    e,
                )
            })?;

        // drop any torn or uncommitted tail before appending
        file.set_len(start)
            .map_err(|e| MappingError::io("Failed to truncate mapping log", e))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| MappingError::io("Failed to seek mapping log", e))?;
        file.write_all(bytes)
            .map_err(|e| MappingError::io("Failed to write mapping log", e))?;
        file.sync_all()
            .map_err(|e| MappingError::io("Failed to fsync mapping log", e))?;

        if !existed {
            if let Some(parent) = self.path.parent() {
                File::open(parent)
                    .and_then(|dir| dir.sync_all())
                    .map_err(|e| {
                        MappingError::io(
                            format!("Failed to fsync mapping directory: {}", parent.display()),
                            e,
                        )
                    })?;
            }
        }
        Ok(())
    }

    /// Committed rowID of `key` in `field`, `None` if never assigned
    pub fn get(&self, field: &str, key: &[u8]) -> MappingResult<Option<u64>> {
        let state = self.lock();
        let tables = state.tables.as_ref().ok_or(MappingError::NotOpen)?;
        let bucket = tables
            .buckets
            .get(field)
            .ok_or_else(|| MappingError::BucketNotFound(field.to_string()))?;
        Ok(bucket.ids.get(key).copied())
    }

    /// Highest committed rowID of `field`, 0 when nothing was assigned
    pub fn get_max_row_id(&self, field: &str) -> MappingResult<u64> {
        let state = self.lock();
        let tables = state.tables.as_ref().ok_or(MappingError::NotOpen)?;
        Ok(tables.buckets.get(field).map(|b| b.sequence).unwrap_or(0))
    }

    pub fn get_location(&self, index: &str, column: u64) -> MappingResult<Option<Vec<u8>>> {
        let state = self.lock();
        let tables = state.tables.as_ref().ok_or(MappingError::NotOpen)?;
        let locations = tables
            .locations
            .get(index)
            .ok_or_else(|| MappingError::BucketNotFound(index.to_string()))?;
        Ok(locations.get(&column).cloned())
    }

    /// RowIDs of `field` whose encoded value satisfies `predicate`.
    ///
    /// A field without a bucket has no rows. The first predicate error stops
    /// the scan.
    pub fn filter<F, E>(&self, field: &str, mut predicate: F) -> Result<Vec<u64>, E>
    where
        F: FnMut(&[u8]) -> Result<bool, E>,
        E: From<MappingError>,
    {
        let state = self.lock();
        let tables = state.tables.as_ref().ok_or(MappingError::NotOpen)?;
        let Some(bucket) = tables.buckets.get(field) else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for (key, id) in &bucket.ids {
            if predicate(key)? {
                rows.push(*id);
            }
        }
        Ok(rows)
    }

    /// Locations of `columns` in column order, reversed when `reverse`.
    ///
    /// Column order is the order rows arrived in during save.
    pub fn sorted_locations(
        &self,
        index: &str,
        columns: &[u64],
        reverse: bool,
    ) -> MappingResult<Vec<Vec<u8>>> {
        let state = self.lock();
        let tables = state.tables.as_ref().ok_or(MappingError::NotOpen)?;
        let locations = tables
            .locations
            .get(index)
            .ok_or_else(|| MappingError::BucketNotFound(index.to_string()))?;

        let mut sorted = columns.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if reverse {
            sorted.reverse();
        }

        sorted
            .into_iter()
            .map(|col| {
                locations.get(&col).cloned().ok_or_else(|| {
                    MappingError::Decode(format!("column {} of {} has no location", col, index))
                })
            })
            .collect()
    }
}
