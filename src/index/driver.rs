//! Bitmap index driver
//!
//! On-disk layout under the driver root:
//!
//! ```text
//! <root>/<db>/<table>/<id>/config.yml        index config
//! <root>/<db>/<table>/<id>/.processing       marker, present while create/save runs
//! <root>/<db>/<table>/<id>/map-<sha1>.db     one mapping log per partition
//! <root>/.bitmap/idx-<sha1>/<field>.bitmap   bitmap engine data, shared per table
//! ```
//!
//! The removal of `.processing` at the end of a save is the durability
//! commit point. An index found with the marker on load is corrupted and
//! is deleted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::bitmap::BitmapHolder;
use crate::crash_point::{maybe_crash, points};
use crate::mapping::Mapping;
use crate::observability::{Logger, MetricsRegistry, ObservationScope};

use super::batch::PartitionBatch;
use super::config::{
    exists_processing_file, read_processing_file, remove_processing_file, write_processing_file,
    DriverConfig, IndexConfig, ProcessingKind, CONFIG_FILE_NAME, PROCESSING_FILE_NAME,
};
use super::errors::{IndexError, IndexResult};
use super::handle::Index;
use super::iter::{IndexKeyValueIter, Partition, PartitionIndexKeyValueIter, PartitionIter};
use super::names;
use super::pool::{CancelToken, SaveContext, TokenPool};

/// Id of this driver in index configs
pub const DRIVER_ID: &str = "bitmap";

/// Directory of the bitmap engine data, under the driver root
pub const BITMAP_DIR: &str = ".bitmap";

pub struct Driver {
    config: DriverConfig,
    metrics: Arc<MetricsRegistry>,
    holders: Mutex<HashMap<String, Arc<BitmapHolder>>>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config: config.normalized(),
            metrics: Arc::new(MetricsRegistry::new()),
            holders: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &'static str {
        DRIVER_ID
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Directory holding the config, marker and mappings of an index
    pub fn index_dir(&self, db: &str, table: &str, id: &str) -> PathBuf {
        self.config.root.join(db).join(table).join(id)
    }

    fn dir_of(&self, index: &Index) -> PathBuf {
        self.index_dir(index.database(), index.table(), index.id())
    }

    fn lock_holders(&self) -> MutexGuard<'_, HashMap<String, Arc<BitmapHolder>>> {
        self.holders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bitmap engine index of a table, opened once per driver
    fn holder(&self, db: &str, table: &str) -> IndexResult<Arc<BitmapHolder>> {
        let name = names::index_name(db, table);
        let mut holders = self.lock_holders();
        if let Some(holder) = holders.get(&name) {
            return Ok(Arc::clone(holder));
        }
        let holder = Arc::new(BitmapHolder::open(
            &self.config.root.join(BITMAP_DIR),
            name.clone(),
        )?);
        holders.insert(name, Arc::clone(&holder));
        Ok(holder)
    }

    /// Creates the index directory and config.
    ///
    /// The index has no partitions until its first save.
    pub fn create(
        &self,
        db: &str,
        table: &str,
        id: &str,
        expressions: Vec<String>,
        config: BTreeMap<String, String>,
    ) -> IndexResult<Index> {
        let dir = self.index_dir(db, table, id);
        fs::create_dir_all(&dir).map_err(|e| {
            IndexError::io(format!("Failed to create index directory: {}", dir.display()), e)
        })?;

        let processing = dir.join(PROCESSING_FILE_NAME);
        write_processing_file(&processing, ProcessingKind::Create)?;
        maybe_crash(points::CREATE_AFTER_PROCESSING_MARKER);

        let config = IndexConfig::new(db, table, id, expressions, DRIVER_ID, config);
        config.write(&dir.join(CONFIG_FILE_NAME))?;
        let holder = self.holder(db, table)?;
        remove_processing_file(&processing)?;

        self.metrics.increment_indexes_created();
        Logger::info(
            "INDEX_CREATED",
            &[
                ("db", db),
                ("table", table),
                ("id", id),
                ("expressions", config.expressions.len().to_string().as_str()),
            ],
        );
        Ok(Index::new(&config, holder, Arc::clone(&self.metrics)))
    }

    /// Indexes every partition of `iter`, several at once.
    ///
    /// The first partition error cancels the others and is returned; the
    /// index then stays marked as processing. The iterator is closed in
    /// every case.
    pub fn save(
        &self,
        ctx: &SaveContext,
        index: &Index,
        iter: &mut dyn PartitionIndexKeyValueIter,
    ) -> IndexResult<()> {
        let scope = ObservationScope::with_fields(
            "INDEX_SAVE",
            &[
                ("db", index.database()),
                ("table", index.table()),
                ("id", index.id()),
            ],
        );

        let cancel = ctx.cancel.child();
        let registration = index.register_save(cancel.clone());
        let result = self.save_partitions(ctx, index, &cancel, iter);
        let closed = iter.close();
        drop(registration);

        match result.and_then(|rows| closed.map(|_| rows)) {
            Ok(rows) => {
                self.metrics.increment_saves_completed();
                scope.complete_with_fields(&[("rows", rows.to_string().as_str())]);
                Ok(())
            }
            Err(e) => {
                self.metrics.increment_saves_failed();
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn save_partitions(
        &self,
        ctx: &SaveContext,
        index: &Index,
        cancel: &CancelToken,
        iter: &mut dyn PartitionIndexKeyValueIter,
    ) -> IndexResult<u64> {
        let dir = self.dir_of(index);
        let processing = dir.join(PROCESSING_FILE_NAME);
        write_processing_file(&processing, ProcessingKind::Save)?;
        maybe_crash(points::SAVE_AFTER_PROCESSING_MARKER);

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = IndexConfig::read(&config_path)?;

        let pool = TokenPool::new(self.config.resolve_threads(ctx.threads));
        let errors: Mutex<Vec<IndexError>> = Mutex::new(Vec::new());
        let rows = AtomicU64::new(0);

        let dispatched: IndexResult<()> = thread::scope(|s| loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            let (partition, kv) = match iter.next() {
                Ok(Some(next)) => next,
                Ok(None) => break Ok(()),
                Err(e) => {
                    cancel.cancel();
                    break Err(e);
                }
            };

            let key = names::mapping_key(partition.key());
            let file_name = names::mapping_file_name(&key);
            let mapping = index.mapping_or_insert(&key, dir.join(&file_name));
            config.driver_mut(DRIVER_ID).insert(key, file_name);

            let token = pool.acquire();
            let (errors, rows) = (&errors, &rows);
            s.spawn(move || {
                let _token = token;
                match self.save_partition(index, partition.as_ref(), kv, &mapping, cancel) {
                    Ok(n) => {
                        rows.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let mut errors = errors.lock().unwrap_or_else(|p| p.into_inner());
                        errors.push(e);
                        cancel.cancel();
                    }
                }
            });
        });
        dispatched?;

        let errors = errors.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        config.write(&config_path)?;
        maybe_crash(points::SAVE_BEFORE_MARKER_REMOVE);
        remove_processing_file(&processing)?;
        Ok(rows.into_inner())
    }

    /// Rebuilds the fields and mapping of one partition
    fn save_partition(
        &self,
        index: &Index,
        partition: &dyn Partition,
        mut kv: Box<dyn IndexKeyValueIter>,
        mapping: &Mapping,
        cancel: &CancelToken,
    ) -> IndexResult<u64> {
        let holder = &index.inner.holder;
        let mut fields = Vec::with_capacity(index.expressions().len());
        for expr in index.expressions() {
            let name = index.field_name(expr, partition);
            holder.delete_field(&name)?;
            fields.push(holder.create_field(&name)?);
        }
        let mut batch = PartitionBatch::new(fields, self.config.batch_size);

        if let Err(e) = mapping.open_create(true) {
            let _ = kv.close();
            return Err(e.into());
        }
        let result = match self.stream_partition(index, mapping, &mut batch, kv.as_mut(), cancel) {
            Ok(cols) => batch.flush(mapping, cols, false).map(|_| cols),
            Err(e) => {
                mapping.rollback();
                Err(e)
            }
        };
        mapping.close();
        let closed = kv.close();

        let cols = result?;
        closed?;
        index
            .inner
            .metrics
            .record_partition(cols, batch.time_bitmap, batch.time_mapping);
        Logger::trace(
            "PARTITION_SAVED",
            &[
                ("id", index.id()),
                ("partition", names::mapping_key(partition.key()).as_str()),
                ("rows", cols.to_string().as_str()),
                ("bitmap_ms", batch.time_bitmap.as_millis().to_string().as_str()),
                ("mapping_ms", batch.time_mapping.as_millis().to_string().as_str()),
            ],
        );
        Ok(cols)
    }

    /// Assigns column ids in arrival order; returns the number of rows read
    fn stream_partition(
        &self,
        index: &Index,
        mapping: &Mapping,
        batch: &mut PartitionBatch,
        kv: &mut dyn IndexKeyValueIter,
        cancel: &CancelToken,
    ) -> IndexResult<u64> {
        let engine_index = index.engine_index();
        mapping.create_locations(engine_index)?;
        for field in &batch.fields {
            mapping.create_bucket(field.name())?;
        }

        let mut col: u64 = 0;
        loop {
            if col != 0 && col % self.config.batch_size == 0 {
                batch.flush(mapping, col, true)?;
            }
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let Some((values, location)) = kv.next()? else {
                break;
            };
            if values.len() != batch.fields.len() {
                return Err(IndexError::InvalidKeys {
                    expected: batch.fields.len(),
                    id: index.id().to_string(),
                    got: values.len(),
                });
            }

            for (i, value) in values.iter().enumerate() {
                if value.is_null() {
                    continue;
                }
                let row = mapping.row_id(batch.fields[i].name(), &value.encode())?;
                batch.bits[i].add(row, col);
            }
            mapping.put_location(engine_index, col, &location)?;
            col += 1;
        }
        Ok(col)
    }

    /// Removes the index from disk and drops the fields of every partition
    /// in `partitions`. Running saves are cancelled and waited for first.
    pub fn delete(&self, index: &Index, partitions: &mut dyn PartitionIter) -> IndexResult<()> {
        index.cancel_saves_and_wait();

        let dir = self.dir_of(index);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(IndexError::io(
                    format!("Failed to remove index directory: {}", dir.display()),
                    e,
                ))
            }
        }
        maybe_crash(points::DELETE_AFTER_DIRECTORY_REMOVE);

        let holder = &index.inner.holder;
        while let Some(partition) = partitions.next()? {
            for expr in index.expressions() {
                holder.delete_field(&index.field_name(expr, partition.as_ref()))?;
            }
            index.remove_mapping(&names::mapping_key(partition.key()));
        }
        partitions.close()?;

        self.metrics.increment_indexes_deleted();
        Logger::info(
            "INDEX_DELETED",
            &[
                ("db", index.database()),
                ("table", index.table()),
                ("id", index.id()),
            ],
        );
        Ok(())
    }

    /// Loads every index of a table.
    ///
    /// Hidden directories are skipped. Corrupted indexes are removed and
    /// left out; any other failure is collected and fails the whole call.
    pub fn load_all(&self, db: &str, table: &str) -> IndexResult<Vec<Index>> {
        let root = self.config.root.join(db).join(table);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(IndexError::io(
                    format!("Failed to read table directory: {}", root.display()),
                    e,
                ))
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| IndexError::io(format!("Failed to read {}", root.display()), e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_dir && !name.starts_with('.') {
                ids.push(name);
            }
        }
        ids.sort();

        let mut indexes = Vec::new();
        let mut errors = Vec::new();
        for id in ids {
            match self.load_index(db, table, &id) {
                Ok(index) => indexes.push(index),
                Err(e) if e.is_corrupted() => {}
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            return Err(IndexError::Aggregate(errors));
        }

        Logger::info(
            "INDEXES_LOADED",
            &[
                ("db", db),
                ("table", table),
                ("count", indexes.len().to_string().as_str()),
            ],
        );
        Ok(indexes)
    }

    /// Loads one index, deleting it when a processing marker is left over
    pub fn load_index(&self, db: &str, table: &str, id: &str) -> IndexResult<Index> {
        let dir = self.index_dir(db, table, id);
        let processing = dir.join(PROCESSING_FILE_NAME);
        if exists_processing_file(&processing)? {
            let kind = match read_processing_file(&processing) {
                Some(ProcessingKind::Create) => "create",
                Some(ProcessingKind::Save) => "save",
                None => "unknown",
            };
            let dir_str = dir.display().to_string();
            Logger::warn(
                "INDEX_CORRUPTED",
                &[
                    ("db", db),
                    ("table", table),
                    ("id", id),
                    ("dir", dir_str.as_str()),
                    ("interrupted", kind),
                ],
            );
            match fs::remove_dir_all(&dir) {
                Ok(()) => self.metrics.increment_corrupted_removed(),
                Err(e) => Logger::warn(
                    "INDEX_REMOVE_FAILED",
                    &[("dir", dir_str.as_str()), ("error", e.to_string().as_str())],
                ),
            }
            return Err(IndexError::corrupted(db, table, id));
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(IndexError::corrupted(db, table, id));
        }
        let config = IndexConfig::read(&config_path)?;
        let Some(driver_config) = config.driver(DRIVER_ID) else {
            return Err(IndexError::corrupted(db, table, id));
        };

        let holder = self.holder(db, table)?;
        let index = Index::new(&config, holder, Arc::clone(&self.metrics));
        for (key, file_name) in driver_config {
            if !names::is_mapping_file_name(file_name) {
                continue;
            }
            let path = dir.join(names::mapping_file_name(key));
            if path.exists() {
                index.set_mapping(key.clone(), Arc::new(Mapping::new(path)));
            }
        }
        Ok(index)
    }
}
