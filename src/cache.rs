//! Export decision cache.
//!
//! Rendering a photo through darktable-cli takes seconds; deciding it
//! doesn't need rendering takes a hash. This module persists those
//! decisions across runs.
//!
//! [`ExportCache`] owns three namespaces inside one [`Store`] file,
//! derived from a caller-chosen cache key:
//!
//! - **`{key}:main`** — the single configuration fingerprint record for
//!   the profile that produced everything below;
//! - **`{key}:xmp`** — per-photo sidecar content hash at last export;
//! - **`{key}:args`** — per-photo output path template handed to the
//!   renderer at last export (the out-dir + rendered filename template);
//! - **`{key}:export`** — per-photo path of the last produced output file.
//!
//! ## Configuration drift
//!
//! On open, the stored fingerprint is compared against the current one. A
//! mismatch means every cached decision describes outputs that are no
//! longer reproducible from current inputs (different size, different
//! template, different darktable config…), so both per-photo namespaces
//! are pruned wholesale before any photo is processed. This is
//! informational, not an error — changing the config and re-running is the
//! normal way to re-render everything.
//!
//! Per-photo rows are keyed by [`PhotoId`]'s display form,
//! `{source-path}:{version}`.

use crate::catalog::PhotoId;
use crate::store::{Namespace, Store, StoreError};
use std::path::{Path, PathBuf};

/// Key of the fingerprint record inside the `main` namespace.
const FINGERPRINT_KEY: &str = "args_hash";

/// Four typed views over one physical store.
#[derive(Debug)]
pub struct ExportCache {
    store: Store,
    main: Namespace,
    xmp: Namespace,
    args: Namespace,
    export: Namespace,
}

impl ExportCache {
    /// Open the cache, pruning per-photo state if `fingerprint` differs
    /// from the one stored by the previous run.
    pub fn open(
        store_path: impl Into<PathBuf>,
        cache_key: &str,
        fingerprint: &str,
    ) -> Result<Self, StoreError> {
        let mut cache = Self {
            store: Store::open(store_path)?,
            main: Namespace::new(format!("{cache_key}:main")),
            xmp: Namespace::new(format!("{cache_key}:xmp")),
            args: Namespace::new(format!("{cache_key}:args")),
            export: Namespace::new(format!("{cache_key}:export")),
        };

        let stored: Option<String> = cache.store.load(&cache.main, FINGERPRINT_KEY);
        if stored.as_deref() != Some(fingerprint) {
            if let Some(old) = &stored {
                log::info!(
                    "configuration fingerprint changed ({old} -> {fingerprint}), \
                     discarding cached export decisions"
                );
            }
            cache.store.prune(&cache.xmp)?;
            cache.store.prune(&cache.args)?;
            cache.store.prune(&cache.export)?;
        }
        cache
            .store
            .save(&cache.main, FINGERPRINT_KEY, &fingerprint)?;

        Ok(cache)
    }

    /// The fingerprint currently on record.
    pub fn fingerprint(&self) -> Option<String> {
        self.store.load(&self.main, FINGERPRINT_KEY)
    }

    /// Sidecar content hash at last export, if any.
    pub fn sidecar_hash(&self, id: &PhotoId) -> Option<String> {
        self.store.load(&self.xmp, &id.to_string())
    }

    pub fn set_sidecar_hash(&mut self, id: &PhotoId, hash: &str) -> Result<(), StoreError> {
        self.store.save(&self.xmp, &id.to_string(), &hash)
    }

    /// Output path template handed to the renderer at last export, if any.
    /// Substitution values are already resolved into it, so a different
    /// tag or position on the next run reads as a mismatch.
    pub fn render_args(&self, id: &PhotoId) -> Option<String> {
        self.store.load(&self.args, &id.to_string())
    }

    pub fn set_render_args(&mut self, id: &PhotoId, out_path: &str) -> Result<(), StoreError> {
        self.store.save(&self.args, &id.to_string(), &out_path)
    }

    /// Path of the last produced output file, if any. The caller must
    /// still check the file exists — a recorded path whose file is gone is
    /// a cache miss, never a hit.
    pub fn output_path(&self, id: &PhotoId) -> Option<PathBuf> {
        let path: String = self.store.load(&self.export, &id.to_string())?;
        Some(PathBuf::from(path))
    }

    pub fn set_output_path(&mut self, id: &PhotoId, path: &Path) -> Result<(), StoreError> {
        self.store
            .save(&self.export, &id.to_string(), &path.to_string_lossy())
    }

    /// Raw per-photo keys whose recorded output equals `path`. Used by
    /// reconciliation to clean up rows for a file it is about to delete.
    pub fn keys_with_output(&self, path: &Path) -> Vec<String> {
        self.store
            .keys_with_value(&self.export, &path.to_string_lossy())
    }

    /// Drop all per-photo rows for a raw key (as returned by
    /// [`keys_with_output`](Self::keys_with_output)).
    pub fn forget(&mut self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.export, key)?;
        self.store.delete(&self.args, key)?;
        self.store.delete(&self.xmp, key)
    }

    /// All output paths currently on record in the export namespace.
    pub fn recorded_outputs(&self) -> Vec<PathBuf> {
        self.store
            .entries(&self.export)
            .into_iter()
            .filter_map(|(_, value)| value.as_str().map(PathBuf::from))
            .collect()
    }
}
