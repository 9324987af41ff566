//! # dtexport
//!
//! Incremental batch export for darktable photo libraries. Point it at a
//! list of photos and an export profile; it renders each one through
//! `darktable-cli`, skips photos whose edits haven't changed since the
//! last run, and reconciles the output directory against the current
//! selection.
//!
//! # Architecture: Decide, Render, Reconcile
//!
//! An export run has three concerns, each with its own module boundary:
//!
//! ```text
//! 1. Decide      cache + fingerprint   (is the previous output still valid?)
//! 2. Render      renderer + metadata   (darktable-cli, then exiftool rewrite)
//! 3. Reconcile   exporter::sync        (delete outputs no longer selected)
//! ```
//!
//! The decision layer is the point of the tool: rendering a raw file
//! through darktable takes seconds per photo, while deciding it doesn't
//! need rendering takes one file hash. A photo is re-rendered only when
//! its XMP sidecar changed, its previous output disappeared, or the
//! profile itself changed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`exporter`] | The engine — cached export of one photo, output reconciliation |
//! | [`cache`] | Per-photo export decisions persisted across runs |
//! | [`store`] | Namespaced JSON key-value file under the cache (lock + atomic writes) |
//! | [`fingerprint`] | Canonical digest of a parameter set |
//! | [`config`] | TOML export profile: sizes, format, template, transforms |
//! | [`catalog`] | Photo records, identity, sidecar naming, raw-format detection |
//! | [`template`] | `$(VARIABLE)` output filename templates, parsed to a closed token set |
//! | [`sidecar`] | XMP hashing and pre-render sidecar transforms |
//! | [`renderer`] | `darktable-cli` invocation behind the [`Renderer`](renderer::Renderer) trait |
//! | [`metadata`] | exiftool-backed strip-and-rewrite of embedded metadata |
//!
//! # Design Decisions
//!
//! ## One store file, namespaced
//!
//! All cached state lives in a single JSON file guarded by a lock file
//! and written via atomic rename. Namespacing (`{cache_key}:xmp`,
//! `{cache_key}:export`, …) lets several export profiles share the file
//! without stepping on each other. See [`store`].
//!
//! ## Fingerprint-keyed invalidation
//!
//! Every render-affecting profile value feeds one digest
//! ([`config::ProfileConfig::fingerprint`]). The cache compares it on
//! open and prunes wholesale on mismatch, so a profile edit re-renders
//! everything and a cache hit is always consistent with the current
//! configuration. There is no per-field invalidation to get wrong.
//!
//! ## darktable-cli is the source of truth for output paths
//!
//! The output argument handed to `darktable-cli` may still contain
//! `$(FILE.NAME)`-style variables, and darktable uniquifies clashing
//! filenames on its own. The realized path is therefore parsed from the
//! renderer's stdout rather than predicted, and that parsed path is what
//! the cache records. See [`renderer`].
//!
//! ## Reconciliation deletes by confirmation, not by listing
//!
//! [`exporter::Exporter::sync`] removes every non-raw file in the output
//! directory that the current run did not confirm. This keeps the output
//! tree an exact mirror of the selection without maintaining a manifest
//! of "files we own" — at the cost of being destructive to unrelated
//! files placed there. The CLI gates it behind an explicit flag pair.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod exporter;
pub mod fingerprint;
pub mod metadata;
pub mod renderer;
pub mod sidecar;
pub mod store;
pub mod template;
