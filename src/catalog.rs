//! Photo records and identity.
//!
//! The catalog query layer (darktable's `library.db`/`data.db` schema) is
//! not part of this crate. Photos arrive as a JSON manifest produced by an
//! external dump — each record carries the two fields that identify a
//! renderable photo: the source file path and the darktable duplicate
//! version number.
//!
//! ## Identity
//!
//! [`PhotoId`] is the cache key type: `(source_path, version)`. Its
//! [`Display`](std::fmt::Display) form, `{path}:{version}`, is what the
//! store persists. The identity is stable across runs as long as the photo
//! is not re-versioned in darktable.
//!
//! ## Sidecar convention
//!
//! darktable writes one XMP sidecar per photo version next to the source
//! file:
//!
//! ```text
//! IMG_0001.cr2            version 0  →  IMG_0001.cr2.xmp
//! IMG_0001.cr2            version 3  →  IMG_0001_03.cr2.xmp
//! ```
//!
//! The version infix is two-digit zero-padded and only present for
//! versions above zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable identity of one renderable photo version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoId {
    pub source_path: PathBuf,
    pub version: u32,
}

impl fmt::Display for PhotoId {
    /// The persisted cache key form: `{source-path}:{version}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_path.display(), self.version)
    }
}

/// One photo record from the catalog dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// Full path to the source (raw) file.
    pub source_path: PathBuf,
    /// darktable duplicate version; 0 for the original edit.
    #[serde(default)]
    pub version: u32,
}

impl Photo {
    pub fn new(source_path: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            source_path: source_path.into(),
            version,
        }
    }

    pub fn id(&self) -> PhotoId {
        PhotoId {
            source_path: self.source_path.clone(),
            version: self.version,
        }
    }

    /// Path of this version's XMP sidecar, derived from the source path.
    pub fn sidecar_path(&self) -> PathBuf {
        let stem = self
            .source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .source_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let infix = if self.version > 0 {
            format!("_{:02}", self.version)
        } else {
            String::new()
        };

        let sidecar = format!("{stem}{infix}{ext}.xmp");
        match self.source_path.parent() {
            Some(dir) => dir.join(sidecar),
            None => PathBuf::from(sidecar),
        }
    }
}

/// Raw image file extensions, lowercase, no dots.
///
/// <https://en.wikipedia.org/wiki/Raw_image_format> plus the formats
/// darktable-cli accepts as input. `tif` is deliberately absent: darktable
/// both reads and *exports* TIFF, so a `.tif` in the output tree is an
/// export artifact, not a protected original.
const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "ari", "arw", "bay", "braw", "crw", "cr2", "cr3", "cap", "data", "dcs", "dcr", "dng",
    "drf", "eip", "erf", "fff", "gpr", "iiq", "k25", "kdc", "mdc", "mef", "mos", "mrw", "nef",
    "nrw", "obm", "orf", "pef", "ptx", "pxn", "r3d", "raf", "raw", "rwl", "rw2", "rwz", "sr2",
    "srf", "srw", "x3f",
];

/// Whether `ext` names a raw photo format. Accepts a leading dot and any
/// case; reconciliation uses this to tell protected originals from
/// deletable export artifacts.
pub fn is_raw_extension(ext: &str) -> bool {
    let normalized = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    RAW_EXTENSIONS.contains(&normalized.as_str())
}
