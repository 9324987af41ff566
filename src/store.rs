//! File-backed key→value store with namespaced keys.
//!
//! One [`Store`] owns one physical JSON file. Multiple logical caches share
//! it without collision by prefixing every key with a [`Namespace`] — the
//! export engine keeps its configuration fingerprint, per-photo sidecar
//! hashes, and per-photo output paths as three namespaces in a single file
//! (see [`crate::cache`]).
//!
//! ## On-disk format
//!
//! ```text
//! {
//!   "version": 1,
//!   "entries": {
//!     "portfolio:xmp:/photos/IMG_0001.cr2:0": { "expires": null, "value": "9f86d0…" },
//!     "portfolio:export:/photos/IMG_0001.cr2:0": { "expires": null, "value": "out/IMG_0001.jpg" }
//!   }
//! }
//! ```
//!
//! Entries carry an optional expiry (seconds since the epoch; `null` means
//! never). Expired entries load as missing. The export engine only ever
//! writes never-expiring entries.
//!
//! ## Concurrency
//!
//! The store is single-writer. [`Store::open`] takes an exclusive sibling
//! lock file (`<store>.lock`, created with `create_new`) and holds it until
//! the store is dropped; a second opener fails with [`StoreError::Locked`]
//! instead of silently interleaving read-modify-write cycles. Every
//! mutation rewrites the whole file through a temp file followed by an
//! atomic rename, so readers never observe a partial store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Version of the store file format. Bump to invalidate the key encoding
/// or entry layout; there is no migration path (a fingerprint mismatch is
/// the only cache invalidation trigger above this layer).
const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("store format version {found} is unsupported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("store is locked by another process (lock file: {0})")]
    Locked(PathBuf),
}

/// A key prefix that scopes one logical cache inside a shared [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    fn physical(&self, key: &str) -> String {
        format!("{}:{}", self.0, key)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.0)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Entry {
    /// Seconds since the epoch; `None` never expires.
    #[serde(default)]
    expires: Option<u64>,
    value: serde_json::Value,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, Entry>,
}

/// Exclusive lock on a store file, held for the lifetime of the [`Store`].
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: PathBuf) -> Result<Self, StoreError> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::Locked(path))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Best effort; a leftover lock file surfaces as Locked on next open.
        let _ = fs::remove_file(&self.path);
    }
}

/// A namespaced key→value store rooted at one physical JSON file.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    entries: BTreeMap<String, Entry>,
    _lock: LockFile,
}

impl Store {
    /// Open (or create) the store at `path`, taking the writer lock.
    ///
    /// A missing file is an empty store. An unreadable or unparseable file
    /// is an error: the caller cannot tell stale cache from lost state, so
    /// the whole run must stop rather than silently re-render everything
    /// against a store it cannot update.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock = LockFile::acquire(lock_path(&path))?;

        let entries = match fs::read_to_string(&path) {
            Ok(content) => {
                let file: StoreFile = serde_json::from_str(&content)?;
                if file.version != STORE_VERSION {
                    return Err(StoreError::Version {
                        found: file.version,
                        expected: STORE_VERSION,
                    });
                }
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(Self {
            path,
            entries,
            _lock: lock,
        })
    }

    /// Save a never-expiring value under `key` in `ns`, overwriting any
    /// previous value.
    pub fn save<T: Serialize>(
        &mut self,
        ns: &Namespace,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.save_expiring(ns, key, value, None)
    }

    /// Save a value with an optional expiry timestamp (seconds since the
    /// epoch). Expired entries load as missing.
    pub fn save_expiring<T: Serialize>(
        &mut self,
        ns: &Namespace,
        key: &str,
        value: &T,
        expires: Option<u64>,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(ns.physical(key), Entry { expires, value });
        self.write()
    }

    /// Load the value under `key` in `ns`. Missing, expired, and
    /// wrong-shaped values all read as `None`.
    pub fn load<T: DeserializeOwned>(&self, ns: &Namespace, key: &str) -> Option<T> {
        let entry = self.entries.get(&ns.physical(key))?;
        if is_expired(entry) {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    /// Remove the entry under `key` in `ns`, if present.
    pub fn delete(&mut self, ns: &Namespace, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(&ns.physical(key)).is_some() {
            self.write()?;
        }
        Ok(())
    }

    /// Remove every entry in `ns`.
    pub fn prune(&mut self, ns: &Namespace) -> Result<(), StoreError> {
        let prefix = ns.prefix();
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        if self.entries.len() != before {
            self.write()?;
        }
        Ok(())
    }

    /// Prune `ns`, then bulk-save `values` into it.
    pub fn replace<T: Serialize>(
        &mut self,
        ns: &Namespace,
        values: &BTreeMap<String, T>,
    ) -> Result<(), StoreError> {
        let prefix = ns.prefix();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        for (key, value) in values {
            let value = serde_json::to_value(value)?;
            self.entries.insert(
                ns.physical(key),
                Entry {
                    expires: None,
                    value,
                },
            );
        }
        self.write()
    }

    /// All live `(key, value)` pairs in `ns`, logical keys (prefix removed).
    pub fn entries(&self, ns: &Namespace) -> Vec<(String, serde_json::Value)> {
        let prefix = ns.prefix();
        self.entries
            .iter()
            .filter(|(key, entry)| key.starts_with(&prefix) && !is_expired(entry))
            .map(|(key, entry)| (key[prefix.len()..].to_string(), entry.value.clone()))
            .collect()
    }

    /// Logical keys in `ns` whose stored value equals `value`. Used by
    /// reconciliation to find cache rows pointing at a given output file.
    pub fn keys_with_value<T: Serialize>(&self, ns: &Namespace, value: &T) -> Vec<String> {
        let wanted = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        self.entries(ns)
            .into_iter()
            .filter(|(_, v)| *v == wanted)
            .map(|(key, _)| key)
            .collect()
    }

    /// Path of the physical store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole file via temp file + atomic rename.
    fn write(&self) -> Result<(), StoreError> {
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

fn lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    store_path.with_file_name(name)
}

fn is_expired(entry: &Entry) -> bool {
    match entry.expires {
        Some(at) => now_secs() >= at,
        None => false,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
