//! Directory-backed record store.
//!
//! Layout: `<root>/<namespace>/<id>.json`, plus a `LOCK` file held for the
//! lifetime of the store.

use super::{validate_id, Namespace, RecordIds, RecordStore};
use crate::codec::RECORD_EXTENSION;
use crate::error::{Result, StateError};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Root directory of the store.
    pub path: PathBuf,

    /// Number of records kept in the read cache; 0 disables it.
    ///
    /// Cached bytes are only served while the file's length and
    /// modification time still match, so external edits are always seen.
    pub cache_size: usize,

    /// Whether to create the root directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Hold an exclusive lock on the root so only one process writes.
    pub lock: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./states"),
            cache_size: 256,
            create_if_missing: true,
            lock: true,
        }
    }
}

type CacheKey = (Namespace, String);

/// Length and modification time of a record file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// Cached record bytes with the fingerprint they were read at.
struct CachedRecord {
    bytes: Vec<u8>,
    fingerprint: Fingerprint,
}

/// Record store backed by one file per record.
pub struct FileStore {
    root: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: Option<File>,

    /// Raw bytes of recently read or written records.
    cache: Option<Mutex<LruCache<CacheKey, CachedRecord>>>,
}

impl FileStore {
    /// Open the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StateError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("state store not found at {}", config.path.display()),
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = if config.lock {
            Some(Self::acquire_lock(&config.path)?)
        } else {
            None
        };

        let cache = NonZeroUsize::new(config.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Ok(Self {
            root: config.path,
            _lock_file: lock_file,
            cache,
        })
    }

    /// Open a store at `path` with default settings.
    pub fn at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StateError::Locked)?;

        Ok(lock_file)
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.dir_name())
    }

    fn record_path(&self, namespace: Namespace, id: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    fn temp_path(&self, namespace: Namespace, id: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!(".{}.{}.tmp", id, RECORD_EXTENSION))
    }

    /// Id of a record file, or `None` for anything else in the directory.
    fn record_id(file_name: &str) -> Option<&str> {
        if file_name.starts_with('.') {
            return None;
        }
        file_name
            .strip_suffix(RECORD_EXTENSION)?
            .strip_suffix('.')
            .filter(|id| !id.is_empty())
    }

    fn cache_put(&self, namespace: Namespace, id: &str, bytes: &[u8], fingerprint: Fingerprint) {
        if let Some(cache) = &self.cache {
            cache.lock().put(
                (namespace, id.to_string()),
                CachedRecord {
                    bytes: bytes.to_vec(),
                    fingerprint,
                },
            );
        }
    }

    fn cache_evict(&self, namespace: Namespace, id: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().pop(&(namespace, id.to_string()));
        }
    }

    fn cached(&self, namespace: Namespace, id: &str, fingerprint: Fingerprint) -> Option<Vec<u8>> {
        let mut cache = self.cache.as_ref()?.lock();
        let cached = cache.get(&(namespace, id.to_string()))?;
        let bytes = (cached.fingerprint == fingerprint).then(|| cached.bytes.clone());
        bytes
    }
}

impl RecordStore for FileStore {
    fn put(&self, namespace: Namespace, id: &str, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        fs::create_dir_all(self.namespace_dir(namespace))?;

        let temp_path = self.temp_path(namespace, id);
        let record_path = self.record_path(namespace, id);
        let write = || -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &record_path)
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            self.cache_evict(namespace, id);
            return Err(e.into());
        }

        match fs::metadata(&record_path) {
            Ok(metadata) => self.cache_put(namespace, id, bytes, Fingerprint::of(&metadata)),
            Err(_) => self.cache_evict(namespace, id),
        }
        Ok(())
    }

    fn get(&self, namespace: Namespace, id: &str) -> Result<Option<Vec<u8>>> {
        validate_id(id)?;
        let path = self.record_path(namespace, id);

        let fingerprint = match fs::metadata(&path) {
            Ok(metadata) => Fingerprint::of(&metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.cache_evict(namespace, id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(bytes) = self.cached(namespace, id, fingerprint) {
            return Ok(Some(bytes));
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.cache_evict(namespace, id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.cache_put(namespace, id, &bytes, fingerprint);
        Ok(Some(bytes))
    }

    fn delete(&self, namespace: Namespace, id: &str) -> Result<bool> {
        validate_id(id)?;
        self.cache_evict(namespace, id);

        match fs::remove_file(self.record_path(namespace, id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, namespace: Namespace) -> Result<RecordIds<'_>> {
        let entries = match fs::read_dir(self.namespace_dir(namespace)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Box::new(std::iter::empty()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Box::new(entries.filter_map(|entry| match entry {
            Ok(entry) => {
                let name = entry.file_name();
                let id = Self::record_id(&name.to_string_lossy()).map(str::to_string);
                id.map(Ok)
            }
            Err(e) => Some(Err(StateError::from(e))),
        })))
    }

    fn size(&self, namespace: Namespace) -> Result<u64> {
        let entries = match fs::read_dir(self.namespace_dir(namespace)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut total = 0u64;
        for entry in entries {
            let entry = entry?;
            if Self::record_id(&entry.file_name().to_string_lossy()).is_some() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}
