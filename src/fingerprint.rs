//! Configuration fingerprinting for cache invalidation.
//!
//! An [`Exporter`](crate::exporter::Exporter) caches per-photo decisions
//! that are only valid for the exact configuration that produced them: the
//! darktable-cli binary, the config directory, the output template, the
//! target size, and so on. Changing any of these makes every previously
//! exported file unreproducible from current inputs, so the whole cache
//! must go.
//!
//! Rather than comparing each value individually, the exporter hashes all
//! of them into a single digest at construction time and stores it next to
//! the per-photo entries. A digest mismatch on the next run prunes the
//! cache wholesale — no manual cache-clear step, no per-field migration.
//!
//! ## Canonical form
//!
//! The digest is SHA-256 over a canonical serialization:
//!
//! - positional values in the order given;
//! - named values flattened to `key, value` pairs, sorted by key, so
//!   insertion order never affects the digest;
//! - absent values replaced by a sentinel token distinct from any real
//!   string;
//! - everything joined with `|` and hashed as UTF-8 bytes.
//!
//! Two fingerprints over the same values are byte-identical; any single
//! changed value flips the digest.

use sha2::{Digest, Sha256};

/// Stands in for an absent value in the canonical serialization.
/// Distinct from the empty string, so `None` and `Some("")` hash apart.
const NONE_SENTINEL: &str = "__none__";

/// Compute a fingerprint over positional and named configuration values.
///
/// `named` pairs may arrive in any order; they are sorted by key before
/// serialization. Returns a 64-character lowercase hex digest.
pub fn fingerprint(positional: &[Option<&str>], named: &[(&str, Option<&str>)]) -> String {
    let mut pairs: Vec<&(&str, Option<&str>)> = named.iter().collect();
    pairs.sort_by_key(|(key, _)| *key);

    let mut items: Vec<&str> = Vec::with_capacity(positional.len() + pairs.len() * 2);
    for value in positional {
        items.push(value.unwrap_or(NONE_SENTINEL));
    }
    for (key, value) in pairs {
        items.push(key);
        items.push(value.unwrap_or(NONE_SENTINEL));
    }

    let canonical = items.join("|");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_equal_inputs() {
        let a = fingerprint(&[Some("darktable-cli")], &[("width", Some("2048"))]);
        let b = fingerprint(&[Some("darktable-cli")], &[("width", Some("2048"))]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn named_order_does_not_matter() {
        let a = fingerprint(&[], &[("width", Some("2048")), ("height", Some("2048"))]);
        let b = fingerprint(&[], &[("height", Some("2048")), ("width", Some("2048"))]);
        assert_eq!(a, b);
    }

    #[test]
    fn positional_order_matters() {
        let a = fingerprint(&[Some("a"), Some("b")], &[]);
        let b = fingerprint(&[Some("b"), Some("a")], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn any_changed_value_changes_digest() {
        let base = fingerprint(&[], &[("width", Some("2048")), ("ext", Some("jpg"))]);
        let width = fingerprint(&[], &[("width", Some("1024")), ("ext", Some("jpg"))]);
        let ext = fingerprint(&[], &[("width", Some("2048")), ("ext", Some("png"))]);
        assert_ne!(base, width);
        assert_ne!(base, ext);
    }

    #[test]
    fn none_is_distinct_from_empty_string() {
        let none = fingerprint(&[], &[("artist", None)]);
        let empty = fingerprint(&[], &[("artist", Some(""))]);
        assert_ne!(none, empty);
    }

    #[test]
    fn key_rename_changes_digest() {
        let a = fingerprint(&[], &[("width", Some("2048"))]);
        let b = fingerprint(&[], &[("height", Some("2048"))]);
        assert_ne!(a, b);
    }
}
