use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use crate::bitmap::BitmapHolder;
use crate::key::IndexKey;
use crate::mapping::Mapping;
use crate::observability::MetricsRegistry;

use super::config::{IndexConfig, CHECKSUM_KEY};
use super::driver::DRIVER_ID;
use super::errors::{IndexError, IndexResult};
use super::iter::Partition;
use super::lookup::{IndexLookup, Lookup, LookupKind};
use super::names;
use super::pool::CancelToken;

#[derive(Debug, Default)]
struct SaveTracker {
    next_id: u64,
    active: BTreeMap<u64, CancelToken>,
}

pub(crate) struct IndexInner {
    pub holder: Arc<BitmapHolder>,
    pub db: String,
    pub table: String,
    pub id: String,
    pub expressions: Vec<String>,
    pub checksum: String,
    pub mappings: RwLock<HashMap<String, Arc<Mapping>>>,
    pub metrics: Arc<MetricsRegistry>,
    saves: Mutex<SaveTracker>,
    saves_done: Condvar,
}

/// A bitmap index over one or more expressions of a table.
///
/// Cheap to clone; clones share mappings and in-flight save tracking.
#[derive(Clone)]
pub struct Index {
    pub(crate) inner: Arc<IndexInner>,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("db", &self.inner.db)
            .field("table", &self.inner.table)
            .field("id", &self.inner.id)
            .field("expressions", &self.inner.expressions)
            .finish()
    }
}

/// Registration of a running save; deregisters on drop
pub(crate) struct SaveRegistration<'a> {
    index: &'a IndexInner,
    id: u64,
}

impl Drop for SaveRegistration<'_> {
    fn drop(&mut self) {
        let mut saves = self.index.lock_saves();
        saves.active.remove(&self.id);
        self.index.saves_done.notify_all();
    }
}

impl IndexInner {
    fn lock_saves(&self) -> MutexGuard<'_, SaveTracker> {
        self.saves.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps one client of a mapping open; closes it on drop
pub(crate) struct OpenMapping(Option<Arc<Mapping>>);

impl OpenMapping {
    pub fn open(mapping: Arc<Mapping>) -> IndexResult<Self> {
        mapping.open()?;
        Ok(Self(Some(mapping)))
    }

    pub fn mapping(&self) -> &Mapping {
        // only `release` empties the slot, and it consumes self
        match &self.0 {
            Some(m) => m,
            None => unreachable!("mapping released"),
        }
    }

    /// Hands the open client over to the caller
    pub fn release(mut self) -> Option<Arc<Mapping>> {
        self.0.take()
    }
}

impl Drop for OpenMapping {
    fn drop(&mut self) {
        if let Some(m) = self.0.take() {
            m.close();
        }
    }
}

impl Index {
    pub(crate) fn new(
        config: &IndexConfig,
        holder: Arc<BitmapHolder>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let checksum = config
            .driver(DRIVER_ID)
            .and_then(|c| c.get(CHECKSUM_KEY))
            .cloned()
            .unwrap_or_default();
        Self {
            inner: Arc::new(IndexInner {
                holder,
                db: config.db.clone(),
                table: config.table.clone(),
                id: config.id.clone(),
                expressions: config.expressions.clone(),
                checksum,
                mappings: RwLock::new(HashMap::new()),
                metrics,
                saves: Mutex::new(SaveTracker::default()),
                saves_done: Condvar::new(),
            }),
        }
    }

    pub fn database(&self) -> &str {
        &self.inner.db
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn expressions(&self) -> &[String] {
        &self.inner.expressions
    }

    pub fn driver(&self) -> &'static str {
        DRIVER_ID
    }

    /// Checksum of the indexed data recorded at creation, empty if none
    pub fn checksum(&self) -> &str {
        &self.inner.checksum
    }

    /// Name of the bitmap engine index this index lives in
    pub fn engine_index(&self) -> &str {
        self.inner.holder.name()
    }

    /// Mapping keys of the partitions saved so far, sorted
    pub fn partitions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_mappings().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read_mappings(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mapping>>> {
        self.inner
            .mappings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_mappings(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Mapping>>> {
        self.inner
            .mappings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_mapping(&self, key: String, mapping: Arc<Mapping>) {
        self.write_mappings().insert(key, mapping);
    }

    /// Mapping of a partition, registering one at `path` if there is none
    pub(crate) fn mapping_or_insert(&self, key: &str, path: PathBuf) -> Arc<Mapping> {
        let mut mappings = self.write_mappings();
        Arc::clone(
            mappings
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mapping::new(path))),
        )
    }

    pub(crate) fn remove_mapping(&self, key: &str) {
        self.write_mappings().remove(key);
    }

    pub(crate) fn mapping(&self, partition: &dyn Partition) -> IndexResult<Arc<Mapping>> {
        let key = names::mapping_key(partition.key());
        self.read_mappings()
            .get(&key)
            .cloned()
            .ok_or(IndexError::MappingNotFound(key))
    }

    pub(crate) fn field_name(&self, expression: &str, partition: &dyn Partition) -> String {
        names::field_name(&self.inner.id, expression, partition.key())
    }

    pub(crate) fn register_save(&self, cancel: CancelToken) -> SaveRegistration<'_> {
        let mut saves = self.inner.lock_saves();
        saves.next_id += 1;
        let id = saves.next_id;
        saves.active.insert(id, cancel);
        SaveRegistration {
            index: &self.inner,
            id,
        }
    }

    /// Cancels every running save of this index and waits for them to end
    pub(crate) fn cancel_saves_and_wait(&self) {
        let mut saves = self.inner.lock_saves();
        for token in saves.active.values() {
            token.cancel();
        }
        while !saves.active.is_empty() {
            saves = self
                .inner
                .saves_done
                .wait(saves)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn check_keys(&self, got: usize) -> IndexResult<()> {
        if got != self.inner.expressions.len() {
            return Err(IndexError::InvalidKeys {
                expected: self.inner.expressions.len(),
                id: self.inner.id.clone(),
                got,
            });
        }
        Ok(())
    }

    fn lookup(&self, kind: LookupKind) -> Arc<dyn Lookup> {
        Arc::new(IndexLookup::new(self.clone(), kind))
    }

    /// Rows whose value of every expression equals the matching key
    pub fn get(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Point(keys.to_vec())))
    }

    /// Whether every key has been seen for its expression in `partition`
    pub fn has(&self, partition: &dyn Partition, keys: &[IndexKey]) -> IndexResult<bool> {
        self.check_keys(keys.len())?;
        let open = OpenMapping::open(self.mapping(partition)?)?;
        for (expr, key) in self.inner.expressions.iter().zip(keys) {
            let name = self.field_name(expr, partition);
            if open.mapping().get(&name, &key.encode())?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn ascend_greater_or_equal(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Ascend {
            gte: Some(keys.to_vec()),
            lt: None,
        }))
    }

    pub fn ascend_less_than(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Ascend {
            gte: None,
            lt: Some(keys.to_vec()),
        }))
    }

    /// Rows in `[greater_or_equal, less_than)`, in insertion order
    pub fn ascend_range(
        &self,
        greater_or_equal: &[IndexKey],
        less_than: &[IndexKey],
    ) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(greater_or_equal.len())?;
        self.check_keys(less_than.len())?;
        Ok(self.lookup(LookupKind::Ascend {
            gte: Some(greater_or_equal.to_vec()),
            lt: Some(less_than.to_vec()),
        }))
    }

    pub fn descend_greater(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Descend {
            gt: Some(keys.to_vec()),
            lte: None,
        }))
    }

    pub fn descend_less_or_equal(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Descend {
            gt: None,
            lte: Some(keys.to_vec()),
        }))
    }

    /// Rows in `(greater_than, less_or_equal]`, in reverse insertion order
    pub fn descend_range(
        &self,
        less_or_equal: &[IndexKey],
        greater_than: &[IndexKey],
    ) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(less_or_equal.len())?;
        self.check_keys(greater_than.len())?;
        Ok(self.lookup(LookupKind::Descend {
            gt: Some(greater_than.to_vec()),
            lte: Some(less_or_equal.to_vec()),
        }))
    }

    /// Rows whose value differs from the key for every expression
    pub fn not(&self, keys: &[IndexKey]) -> IndexResult<Arc<dyn Lookup>> {
        self.check_keys(keys.len())?;
        Ok(self.lookup(LookupKind::Negate(keys.to_vec())))
    }
}
