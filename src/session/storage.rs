//! Durable key-value storage backing the token store.
//!
//! Mirrors the shape of browser local storage: string keys, string values.
//! Writes are batched so one session update touches the disk once.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use super::errors::StorageError;

type Items = BTreeMap<String, String>;

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store several items in one write.
    fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Remove several items in one write. Missing keys are ignored.
    fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError>;
}

impl<T: LocalStorage + ?Sized> LocalStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError> {
        (**self).set_items(items)
    }

    fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        (**self).remove_items(keys)
    }
}

/// In-process storage. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<Items>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, Items> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut stored = self.items();
        for (key, value) in items {
            stored.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut stored = self.items();
        for key in keys {
            stored.remove(*key);
        }
        Ok(())
    }
}

/// A JSON object file on disk, replaced atomically on every write.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_items(&self) -> Result<Items, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageError::Corrupt(self.path.clone(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Items::new()),
            Err(e) => Err(StorageError::Io(self.path.clone(), e)),
        }
    }

    /// Read for a write cycle: a corrupt file is replaced rather than
    /// blocking every future write.
    fn read_items_for_update(&self) -> Result<Items, StorageError> {
        match self.read_items() {
            Err(StorageError::Corrupt(path, e)) => {
                warn!(path = %path.display(), error = %e, "Replacing corrupt storage file");
                Ok(Items::new())
            }
            other => other,
        }
    }

    fn write_items(&self, items: &Items) -> Result<(), StorageError> {
        let io_err = |e| StorageError::Io(self.path.clone(), e);

        if items.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_err(e)),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_vec_pretty(items).map_err(StorageError::Serialize)?;
        let tmp_path = self.tmp_path();

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path).map_err(io_err)?;
        file.write_all(&contents).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn update(&self, apply: impl FnOnce(&mut Items)) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut items = self.read_items_for_update()?;
        apply(&mut items);
        self.write_items(&items)
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_items()?.remove(key))
    }

    fn set_items(&self, items: &[(&str, &str)]) -> Result<(), StorageError> {
        self.update(|stored| {
            for (key, value) in items {
                stored.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn remove_items(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.update(|stored| {
            for key in keys {
                stored.remove(*key);
            }
        })
    }
}
