use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SessionStoreError;

/// Persisted key/value collaborator with `getItem`/`setItem`/`removeItem`
/// semantics.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, SessionStoreError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), SessionStoreError>;

    fn remove_item(&self, key: &str) -> Result<(), SessionStoreError>;
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), SessionStoreError> {
        (**self).remove_item(key)
    }
}

/// Process-local backend. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.items).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.items).is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        Ok(lock_unpoisoned(&self.items).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        lock_unpoisoned(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), SessionStoreError> {
        lock_unpoisoned(&self.items).remove(key);
        Ok(())
    }
}

/// Durable backend shared by every requester of one origin.
///
/// All items live in a single JSON object file. Writes go to a sibling
/// temporary file which is then renamed over the original.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Opens (or lazily creates) the storage file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating storage directory", parent, source)
            })?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(SessionStoreError::io("reading storage file", &self.path, source))
            }
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw)
            .map_err(|source| SessionStoreError::corrupt(self.path.display().to_string(), source))
    }

    fn write_all(&self, items: &BTreeMap<String, String>) -> Result<(), SessionStoreError> {
        let encoded = serde_json::to_string_pretty(items).map_err(|source| {
            SessionStoreError::serialize(self.path.display().to_string(), source)
        })?;

        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded)
            .map_err(|source| SessionStoreError::io("writing storage file", &staging, source))?;
        fs::rename(&staging, &self.path)
            .map_err(|source| SessionStoreError::io("replacing storage file", &self.path, source))
    }

    fn modify(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), SessionStoreError> {
        let _guard = lock_unpoisoned(&self.write_lock);
        let mut items = self.read_all()?;
        change(&mut items);
        self.write_all(&items)
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.modify(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), SessionStoreError> {
        self.modify(|items| {
            items.remove(key);
        })
    }
}

/// Durable-per-tab view over a shared backend.
///
/// Every key is namespaced under `scope`, so two tabs sharing one origin
/// file never see each other's sessions.
pub struct ScopedStorage {
    inner: Arc<dyn KeyValueStorage>,
    prefix: String,
}

impl ScopedStorage {
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStorage>, scope: &str) -> Self {
        Self {
            inner,
            prefix: format!("tab:{scope}:"),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl KeyValueStorage for ScopedStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, SessionStoreError> {
        self.inner.get_item(&self.scoped(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.inner.set_item(&self.scoped(key), value)
    }

    fn remove_item(&self, key: &str) -> Result<(), SessionStoreError> {
        self.inner.remove_item(&self.scoped(key))
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        storage.set_item("a", "1").expect("set");

        assert_eq!(storage.get_item("a").expect("get").as_deref(), Some("1"));
        storage.remove_item("a").expect("remove");
        assert_eq!(storage.get_item("a").expect("get"), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn removing_missing_key_is_not_an_error() {
        let storage = MemoryStorage::new();
        assert!(storage.remove_item("missing").is_ok());
    }

    #[test]
    fn scoped_storage_isolates_tabs_sharing_one_backend() {
        let shared: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let left = ScopedStorage::new(Arc::clone(&shared), "left");
        let right = ScopedStorage::new(Arc::clone(&shared), "right");

        left.set_item("k", "from-left").expect("set");

        assert_eq!(left.get_item("k").expect("get").as_deref(), Some("from-left"));
        assert_eq!(right.get_item("k").expect("get"), None);
        assert_eq!(
            shared.get_item("tab:left:k").expect("get").as_deref(),
            Some("from-left")
        );
    }
}
