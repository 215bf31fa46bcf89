//! Index and driver configuration
//!
//! `config.yml` describes one index: its database, table, id, indexed
//! expressions and a free-form string map per driver. The bitmap driver
//! keeps one entry per saved partition there (hex partition key -> mapping
//! file name) plus the optional `checksum`.
//!
//! `.processing` is the sentinel that marks a create or save in flight.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{IndexError, IndexResult};

pub const CONFIG_FILE_NAME: &str = "config.yml";
pub const PROCESSING_FILE_NAME: &str = ".processing";

/// Driver config key holding the source checksum of the indexed table
pub const CHECKSUM_KEY: &str = "checksum";

/// Rows per bitmap import and mapping commit
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Environment variable overriding the number of partitions saved at once
pub const INDEX_THREADS_ENV: &str = "BITINDEX_INDEX_THREADS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(rename = "DB")]
    pub db: String,
    #[serde(rename = "Table")]
    pub table: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Expressions")]
    pub expressions: Vec<String>,
    #[serde(rename = "Drivers", default)]
    pub drivers: BTreeMap<String, BTreeMap<String, String>>,
}

impl IndexConfig {
    pub fn new(
        db: impl Into<String>,
        table: impl Into<String>,
        id: impl Into<String>,
        expressions: Vec<String>,
        driver: &str,
        config: BTreeMap<String, String>,
    ) -> Self {
        let mut drivers = BTreeMap::new();
        drivers.insert(driver.to_string(), config);
        Self {
            db: db.into(),
            table: table.into(),
            id: id.into(),
            expressions,
            drivers,
        }
    }

    /// The config section of a driver, if the index was created by it
    pub fn driver(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.drivers.get(id)
    }

    pub fn driver_mut(&mut self, id: &str) -> &mut BTreeMap<String, String> {
        self.drivers.entry(id.to_string()).or_default()
    }

    pub fn to_yaml(&self) -> IndexResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| IndexError::Config(format!("cannot serialize config: {}", e)))
    }

    pub fn from_yaml(yaml: &str) -> IndexResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| IndexError::Config(format!("cannot parse config: {}", e)))
    }

    /// Writes the config through a temp file, fsync and rename
    pub fn write(&self, path: &Path) -> IndexResult<()> {
        let yaml = self.to_yaml()?;
        let tmp = path.with_extension("yml.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| {
                IndexError::io(format!("Failed to create config file: {}", tmp.display()), e)
            })?;
            file.write_all(yaml.as_bytes()).map_err(|e| {
                IndexError::io(format!("Failed to write config file: {}", tmp.display()), e)
            })?;
            file.sync_all().map_err(|e| {
                IndexError::io(format!("Failed to fsync config file: {}", tmp.display()), e)
            })?;
        }
        fs::rename(&tmp, path).map_err(|e| {
            IndexError::io(format!("Failed to rename config file: {}", path.display()), e)
        })?;
        sync_parent(path)
    }

    pub fn read(path: &Path) -> IndexResult<Self> {
        let yaml = fs::read_to_string(path).map_err(|e| {
            IndexError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;
        Self::from_yaml(&yaml)
    }
}

/// What left the processing marker behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingKind {
    Create,
    Save,
}

impl ProcessingKind {
    fn as_byte(self) -> u8 {
        match self {
            ProcessingKind::Create => b'C',
            ProcessingKind::Save => b'S',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'C' => Some(ProcessingKind::Create),
            b'S' => Some(ProcessingKind::Save),
            _ => None,
        }
    }
}

/// Writes the processing marker with fsync of file and directory
pub fn write_processing_file(path: &Path, kind: ProcessingKind) -> IndexResult<()> {
    let mut file = File::create(path).map_err(|e| {
        IndexError::io(format!("Failed to create processing file: {}", path.display()), e)
    })?;
    file.write_all(&[kind.as_byte()]).map_err(|e| {
        IndexError::io(format!("Failed to write processing file: {}", path.display()), e)
    })?;
    file.sync_all().map_err(|e| {
        IndexError::io(format!("Failed to fsync processing file: {}", path.display()), e)
    })?;
    sync_parent(path)
}

/// Removes the processing marker. This is the commit point of a save.
pub fn remove_processing_file(path: &Path) -> IndexResult<()> {
    match fs::remove_file(path) {
        Ok(()) => sync_parent(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IndexError::io(
            format!("Failed to remove processing file: {}", path.display()),
            e,
        )),
    }
}

pub fn exists_processing_file(path: &Path) -> IndexResult<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(IndexError::io(
            format!("Failed to stat processing file: {}", path.display()),
            e,
        )),
    }
}

/// Kind recorded in an existing marker, `None` if unreadable or unknown
pub fn read_processing_file(path: &Path) -> Option<ProcessingKind> {
    fs::read(path)
        .ok()
        .and_then(|data| data.first().copied())
        .and_then(ProcessingKind::from_byte)
}

fn sync_parent(path: &Path) -> IndexResult<()> {
    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new().read(true).open(parent).map_err(|e| {
            IndexError::io(
                format!("Failed to open directory for fsync: {}", parent.display()),
                e,
            )
        })?;
        dir.sync_all().map_err(|e| {
            IndexError::io(format!("Failed to fsync directory: {}", parent.display()), e)
        })?;
    }
    Ok(())
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

/// Driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Directory holding `<db>/<table>/<id>/` and the bitmap engine data
    pub root: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Partitions saved concurrently; `None` uses available parallelism
    #[serde(default)]
    pub threads: Option<usize>,
}

impl DriverConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            threads: None,
        }
    }

    /// Like `new`, with `threads` taken from `BITINDEX_INDEX_THREADS`
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        let threads = std::env::var(INDEX_THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        Self {
            threads,
            ..Self::new(root)
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Clamps values that deserialization or direct field access can leave
    /// out of range: a batch holds at least one column.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self
    }

    /// Worker count for one save: per-call override, then this config,
    /// then the number of CPUs. Zero falls through to the next source.
    pub fn resolve_threads(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|n| *n > 0)
            .or(self.threads.filter(|n| *n > 0))
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}
