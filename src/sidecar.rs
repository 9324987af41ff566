//! Sidecar content hashing and sidecar transforms.
//!
//! The XMP sidecar is the only render input that changes between runs
//! without changing a photo's identity — crop, exposure, and rating edits
//! all land there. Hashing its bytes is a cheap, exact "needs re-render"
//! detector: no parsing, no parameter diffing, order-independent over
//! darktable's own rewrites only when the bytes actually match.
//!
//! ## Transforms
//!
//! A profile can request edits to the sidecar before rendering — for
//! example disabling the borders module so portfolio exports come out
//! frameless while the library keeps its framed edit. Transforms are a
//! closed set ([`SidecarTransform`]); their names feed the configuration
//! fingerprint, so adding or removing one invalidates cached exports.
//!
//! Transforms are always applied to a private temporary copy
//! (see [`crate::exporter`]); the original sidecar is never touched.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use std::sync::LazyLock;

/// SHA-256 hash of a sidecar file's contents, as a hex string.
pub fn hash_sidecar(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// An edit applied to a sidecar copy before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SidecarTransform {
    /// Set `darktable:enabled="0"` on history entries whose
    /// `darktable:operation="borders"`, so exports render frameless.
    DisableBorders,
}

static HISTORY_ENTRY: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"<rdf:li\b[^>]*>").expect("valid regex"));
static ENABLED_ATTR: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r#"darktable:enabled="1""#).expect("valid regex"));

impl SidecarTransform {
    /// Stable name, used in profiles and as a fingerprint input.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DisableBorders => "disable-borders",
        }
    }

    /// Apply the transform to XMP text.
    ///
    /// The edit is textual and attribute-order insensitive: only the
    /// matched attribute value changes, everything else in the sidecar
    /// stays byte-identical. darktable does not care about attribute
    /// order, and keeping unrelated bytes stable keeps the sidecar hash
    /// meaningful.
    pub fn apply(&self, xmp: &str) -> String {
        match self {
            Self::DisableBorders => HISTORY_ENTRY
                .replace_all(xmp, |caps: &regex::Captures<'_>| {
                    let element = &caps[0];
                    if element.contains(r#"darktable:operation="borders""#) {
                        ENABLED_ATTR
                            .replace_all(element, r#"darktable:enabled="0""#)
                            .into_owned()
                    } else {
                        element.to_string()
                    }
                })
                .into_owned(),
        }
    }
}

/// Apply transforms in order to XMP text.
pub fn apply_all(transforms: &[SidecarTransform], xmp: &str) -> String {
    transforms
        .iter()
        .fold(xmp.to_string(), |acc, t| t.apply(&acc))
}
