use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::errors::{BitmapError, BitmapResult};
use super::field::Field;

const FIELD_EXTENSION: &str = "bitmap";

/// One bitmap engine index: a directory of named fields.
///
/// Lookups are only mergeable when they read from the same holder, so a
/// holder is identified by its name alone.
#[derive(Debug)]
pub struct BitmapHolder {
    name: String,
    dir: PathBuf,
    fields: Mutex<HashMap<String, Arc<Field>>>,
}

impl BitmapHolder {
    /// Opens (creating if needed) the holder stored in `<root>/<name>`
    pub fn open(root: &Path, name: impl Into<String>) -> BitmapResult<Self> {
        let name = name.into();
        let dir = root.join(&name);
        fs::create_dir_all(&dir).map_err(|e| {
            BitmapError::io(format!("Failed to create bitmap directory: {}", dir.display()), e)
        })?;
        Ok(Self {
            name,
            dir,
            fields: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Field>>> {
        self.fields.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn field_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, FIELD_EXTENSION))
    }

    /// Returns the field, creating an empty one if it does not exist
    pub fn create_field(&self, name: &str) -> BitmapResult<Arc<Field>> {
        let mut fields = self.lock();
        if let Some(field) = fields.get(name) {
            return Ok(Arc::clone(field));
        }

        let path = self.field_path(name);
        let field = if path.exists() {
            Field::load(name, path)?
        } else {
            let field = Field::new(name, path);
            field.persist_empty()?;
            field
        };
        let field = Arc::new(field);
        fields.insert(name.to_string(), Arc::clone(&field));
        Ok(field)
    }

    /// Removes the field and its data. Deleting a missing field is a no-op.
    pub fn delete_field(&self, name: &str) -> BitmapResult<()> {
        let mut fields = self.lock();
        fields.remove(name);

        let path = self.field_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BitmapError::io(
                format!("Failed to remove bitmap field: {}", path.display()),
                e,
            )),
        }
    }

    /// Returns an existing field
    pub fn field(&self, name: &str) -> BitmapResult<Arc<Field>> {
        let mut fields = self.lock();
        if let Some(field) = fields.get(name) {
            return Ok(Arc::clone(field));
        }

        let path = self.field_path(name);
        if !path.exists() {
            return Err(BitmapError::FieldNotFound(name.to_string()));
        }
        let field = Arc::new(Field::load(name, path)?);
        fields.insert(name.to_string(), Arc::clone(&field));
        Ok(field)
    }
}
