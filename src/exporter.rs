//! The export engine: cached rendering and output-directory reconciliation.
//!
//! [`Exporter`] is configured once per run from a [`ProfileConfig`] and then
//! drives two operations:
//!
//! - [`export_cached`](Exporter::export_cached) — render one photo through
//!   the [`Renderer`], unless the cached output from a previous run is
//!   still valid;
//! - [`sync`](Exporter::sync) — delete every file in the output directory
//!   that was not confirmed during the current run.
//!
//! ## When is a cached output still valid?
//!
//! Four conditions, all required:
//!
//! 1. an output path is on record for the photo's identity,
//! 2. the file at that path still exists (external deletion between runs
//!    must never count as a hit),
//! 3. the sidecar's content hash equals the hash recorded at export time,
//!    and
//! 4. the output path template — the out-dir joined with the rendered
//!    filename template, substitution values resolved — equals the one
//!    recorded at export time.
//!
//! The sidecar and the per-call substitution values are the only render
//! inputs that change without changing the photo's identity; the
//! configuration fingerprint covers everything else. A profile edit
//! prunes the whole cache at construction time (see [`crate::cache`]), so
//! a surviving entry is trustworthy.
//!
//! ## Failure model
//!
//! Per-photo failures (missing sidecar, renderer failure, unparseable
//! renderer output, metadata rewrite failure) carry the photo's identity
//! and propagate to the caller; nothing is retried. Whether to continue
//! with the next photo is the caller's policy. Store failures are fatal
//! for the whole run. The one deliberately swallowed failure is file
//! deletion during [`sync`](Exporter::sync) — reconciliation is
//! best-effort tidying, not authoritative state.

use crate::cache::ExportCache;
use crate::catalog::{Photo, PhotoId, is_raw_extension};
use crate::config::ProfileConfig;
use crate::metadata::{MetadataEditor, MetadataError, MetadataFields};
use crate::renderer::{RenderError, RenderRequest, Renderer};
use crate::sidecar::{apply_all, hash_sidecar};
use crate::store::StoreError;
use crate::template::{OutputTemplate, Substitutions, TemplateError};
use std::cell::OnceCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("missing sidecar for {id}: expected {path}")]
    MissingSidecar { id: PhotoId, path: PathBuf },
    #[error("render failed for {id}: {source}")]
    Render {
        id: PhotoId,
        #[source]
        source: RenderError,
    },
    #[error("metadata rewrite failed for {id}: {source}")]
    Metadata {
        id: PhotoId,
        #[source]
        source: MetadataError,
    },
    #[error("could not read dimensions of {path}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One exported photo: its identity and the realized output file.
///
/// Dimensions are probed from the output file's header on first access,
/// not stored — the renderer already wrote them into the file, and most
/// callers never ask.
#[derive(Debug)]
pub struct Export {
    pub id: PhotoId,
    pub path: PathBuf,
    dimensions: OnceCell<(u32, u32)>,
}

impl Export {
    pub fn new(id: PhotoId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            dimensions: OnceCell::new(),
        }
    }

    /// `(width, height)` of the output file, probed lazily and cached.
    pub fn dimensions(&self) -> Result<(u32, u32), ExportError> {
        if let Some(dims) = self.dimensions.get() {
            return Ok(*dims);
        }
        let dims = image::image_dimensions(&self.path).map_err(|source| ExportError::Probe {
            path: self.path.clone(),
            source,
        })?;
        let _ = self.dimensions.set(dims);
        Ok(dims)
    }

    pub fn aspect_ratio(&self) -> Result<f64, ExportError> {
        let (width, height) = self.dimensions()?;
        Ok(f64::from(width) / f64::from(height))
    }
}

/// What one [`sync`](Exporter::sync) pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub removed_files: usize,
    pub removed_entries: usize,
}

/// Export engine for one profile against one store file.
///
/// Holds the store's writer lock for its whole lifetime: one exporter per
/// store file per process. The temporary sidecar used for transformed
/// renders is created at construction and removed on drop, on every exit
/// path.
pub struct Exporter<R: Renderer, M: MetadataEditor> {
    profile: ProfileConfig,
    template: OutputTemplate,
    fingerprint: String,
    renderer: R,
    editor: M,
    cache: ExportCache,
    session: HashSet<PathBuf>,
    tmp_sidecar: NamedTempFile,
}

impl<R: Renderer, M: MetadataEditor> Exporter<R, M> {
    /// Build an exporter, opening (and possibly pruning) the cache.
    ///
    /// Computes the profile fingerprint and hands it to
    /// [`ExportCache::open`]; if the previous run used a different
    /// profile, every per-photo entry is discarded here, before any photo
    /// is processed.
    pub fn new(
        profile: ProfileConfig,
        store_path: impl Into<PathBuf>,
        renderer: R,
        editor: M,
    ) -> Result<Self, ExportError> {
        let template = OutputTemplate::parse(&profile.filename_format)?;
        let fingerprint = profile.fingerprint();
        let cache = ExportCache::open(store_path, &profile.cache_key, &fingerprint)?;
        let tmp_sidecar = tempfile::Builder::new()
            .prefix("dtexport-")
            .suffix(".xmp")
            .tempfile()?;

        Ok(Self {
            profile,
            template,
            fingerprint,
            renderer,
            editor,
            cache,
            session: HashSet::new(),
            tmp_sidecar,
        })
    }

    /// The fingerprint this exporter was constructed with.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Output paths confirmed (rendered or reused) since the last
    /// [`sync`](Self::sync).
    pub fn session(&self) -> &HashSet<PathBuf> {
        &self.session
    }

    /// Export `photo` into `out_dir`, reusing the cached output when the
    /// sidecar is unchanged and the file still exists.
    pub fn export_cached(&mut self, photo: &Photo, out_dir: &Path) -> Result<Export, ExportError> {
        self.export_cached_with(photo, out_dir, &Substitutions::default())
    }

    /// [`export_cached`](Self::export_cached) with values for the
    /// locally-resolved template tokens (`$(tag)`, `$(position)`).
    pub fn export_cached_with(
        &mut self,
        photo: &Photo,
        out_dir: &Path,
        subst: &Substitutions,
    ) -> Result<Export, ExportError> {
        let id = photo.id();
        let sidecar_path = photo.sidecar_path();
        let sidecar_hash = self.hash_sidecar_of(&id, &sidecar_path)?;
        let out_path = posix_join(out_dir, &self.template.render(subst)?);

        if let Some(cached) = self.cache.output_path(&id)
            && cached.exists()
            && self.cache.sidecar_hash(&id).as_deref() == Some(sidecar_hash.as_str())
            && self.cache.render_args(&id).as_deref() == Some(out_path.as_str())
        {
            log::debug!("cache hit for {id}: {}", cached.display());
            self.session.insert(cached.clone());
            return Ok(Export::new(id, cached));
        }

        log::debug!("cache miss for {id}, rendering");
        let export = self.render_to(photo, out_path.clone())?;

        self.cache.set_sidecar_hash(&id, &sidecar_hash)?;
        self.cache.set_render_args(&id, &out_path)?;
        self.cache.set_output_path(&id, &export.path)?;

        Ok(export)
    }

    /// Unconditionally render `photo` into `out_dir`.
    pub fn export(&mut self, photo: &Photo, out_dir: &Path) -> Result<Export, ExportError> {
        self.export_with(photo, out_dir, &Substitutions::default())
    }

    /// [`export`](Self::export) with values for the locally-resolved
    /// template tokens.
    pub fn export_with(
        &mut self,
        photo: &Photo,
        out_dir: &Path,
        subst: &Substitutions,
    ) -> Result<Export, ExportError> {
        let out_path = posix_join(out_dir, &self.template.render(subst)?);
        self.render_to(photo, out_path)
    }

    /// Full export path: optional sidecar transforms, render, metadata
    /// rewrite.
    fn render_to(&mut self, photo: &Photo, out_path: String) -> Result<Export, ExportError> {
        let id = photo.id();
        let mut sidecar = photo.sidecar_path();

        if !self.profile.transforms.is_empty() {
            // Render from a transformed private copy; the photo's own
            // sidecar is never modified.
            let original = match fs::read_to_string(&sidecar) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ExportError::MissingSidecar { id, path: sidecar });
                }
                Err(e) => return Err(ExportError::Io(e)),
            };
            let transformed = apply_all(&self.profile.transforms, &original);
            fs::write(self.tmp_sidecar.path(), transformed)?;
            sidecar = self.tmp_sidecar.path().to_path_buf();
        }

        let request = RenderRequest {
            source: photo.source_path.clone(),
            sidecar,
            out_path,
            width: self.profile.width,
            height: self.profile.height,
            out_ext: self.profile.out_ext.clone(),
            hq_resampling: self.profile.hq_resampling,
            format_options: self.profile.format_options.clone(),
            config_dir: self.profile.config_dir.clone(),
        };

        let realized = self
            .renderer
            .render(&request)
            .map_err(|source| ExportError::Render {
                id: id.clone(),
                source,
            })?;
        self.session.insert(realized.clone());

        self.rewrite_metadata(&id, &realized)?;

        Ok(Export::new(id, realized))
    }

    /// Hash the photo's sidecar, turning a missing file into the typed
    /// per-photo error.
    fn hash_sidecar_of(&self, id: &PhotoId, path: &Path) -> Result<String, ExportError> {
        match hash_sidecar(path) {
            Ok(hash) => Ok(hash),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ExportError::MissingSidecar {
                    id: id.clone(),
                    path: path.to_path_buf(),
                })
            }
            Err(e) => Err(ExportError::Io(e)),
        }
    }

    /// Strip everything, then re-embed artist/copyright from the profile
    /// and the original capture timestamp. Exported files never leak
    /// unrelated embedded metadata.
    fn rewrite_metadata(&self, id: &PhotoId, path: &Path) -> Result<(), ExportError> {
        let wrap = |source: MetadataError| ExportError::Metadata {
            id: id.clone(),
            source,
        };

        let original = self.editor.read(path).map_err(wrap)?;
        self.editor.strip_all(path).map_err(wrap)?;
        self.editor
            .write(
                path,
                &MetadataFields {
                    artist: self.profile.artist.clone(),
                    copyright: self.profile.copyright.clone(),
                    datetime_original: original.datetime_original,
                },
            )
            .map_err(wrap)?;
        Ok(())
    }

    /// Reconcile `directory` against the current run.
    ///
    /// **This deletes files.** Every regular file under `directory` that
    /// was not confirmed since the last `sync` and whose extension is not
    /// a raw photo format is removed — including files unrelated to this
    /// tool that happen to live there. Raw files are always preserved, as
    /// foreign originals that may coexist in the tree. Cache rows pointing
    /// at a removed file are dropped with it.
    ///
    /// Deletion failures are logged and swallowed; reconciliation is
    /// best-effort. Afterwards the accounting window re-anchors to the
    /// exports still on record, so a second `sync` with no export
    /// activity in between removes nothing.
    pub fn sync(&mut self, directory: &Path) -> Result<SyncReport, ExportError> {
        let mut report = SyncReport::default();

        for entry in WalkDir::new(directory).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if self.session.contains(path) {
                continue;
            }
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            if is_raw_extension(&ext) {
                continue;
            }

            for key in self.cache.keys_with_output(path) {
                log::info!("removed from export set: {key}");
                self.cache.forget(&key)?;
                report.removed_entries += 1;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    log::debug!("deleted orphan {}", path.display());
                    report.removed_files += 1;
                }
                Err(e) => {
                    log::warn!("could not delete {}: {e}", path.display());
                }
            }
        }

        self.session = self.cache.recorded_outputs().into_iter().collect();
        Ok(report)
    }
}

/// Join an output directory and a template string with forward slashes.
/// darktable-cli requires posix-style separators in its output argument.
fn posix_join(dir: &Path, rest: &str) -> String {
    let dir = dir.to_string_lossy().replace('\\', "/");
    format!("{}/{}", dir.trim_end_matches('/'), rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::{MockEditor, RecordedOp};
    use crate::renderer::tests::MockRenderer;
    use crate::sidecar::SidecarTransform;
    use tempfile::TempDir;

    fn profile() -> ProfileConfig {
        ProfileConfig {
            cache_key: "portfolio".to_string(),
            cli_bin: PathBuf::from("darktable-cli"),
            config_dir: PathBuf::from("/dt-config"),
            filename_format: "$(FILE.NAME)".to_string(),
            out_ext: "jpg".to_string(),
            format_options: vec![],
            hq_resampling: true,
            width: 2048,
            height: 2048,
            artist: Some("Jane Doe".to_string()),
            copyright: Some("© Jane Doe".to_string()),
            transforms: vec![],
        }
    }

    /// A photo with its sidecar on disk.
    fn photo_with_sidecar(dir: &Path, name: &str, sidecar_content: &str) -> Photo {
        let source = dir.join(name);
        fs::write(&source, b"raw bytes").unwrap();
        let photo = Photo::new(&source, 0);
        fs::write(photo.sidecar_path(), sidecar_content).unwrap();
        photo
    }

    fn exporter(
        profile: ProfileConfig,
        store: &Path,
    ) -> Exporter<MockRenderer, MockEditor> {
        Exporter::new(profile, store, MockRenderer::new(), MockEditor::new()).unwrap()
    }

    // =========================================================================
    // export_cached: miss, hit, and invalidation
    // =========================================================================

    #[test]
    fn fresh_photo_renders_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        let export = ex.export_cached(&photo, &out).unwrap();

        assert_eq!(ex.renderer.render_count(), 1);
        assert_eq!(export.path, out.join("IMG_0001.jpg"));
        assert!(export.path.exists());
        assert!(ex.session().contains(&export.path));
    }

    #[test]
    fn unchanged_photo_is_a_hit() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        let first = ex.export_cached(&photo, &out).unwrap();
        let second = ex.export_cached(&photo, &out).unwrap();

        assert_eq!(ex.renderer.render_count(), 1);
        assert_eq!(second.path, first.path);
    }

    #[test]
    fn hit_survives_exporter_restart() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let store = tmp.path().join("cache.json");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        {
            let mut ex = exporter(profile(), &store);
            ex.export_cached(&photo, &out).unwrap();
        }

        let mut ex = exporter(profile(), &store);
        let export = ex.export_cached(&photo, &out).unwrap();
        assert_eq!(ex.renderer.render_count(), 0);
        assert!(ex.session().contains(&export.path));
    }

    #[test]
    fn deleted_output_file_forces_rerender() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        let first = ex.export_cached(&photo, &out).unwrap();
        fs::remove_file(&first.path).unwrap();

        ex.export_cached(&photo, &out).unwrap();
        assert_eq!(ex.renderer.render_count(), 2);
    }

    #[test]
    fn changed_sidecar_forces_rerender() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &out).unwrap();
        fs::write(photo.sidecar_path(), "edit v2").unwrap();
        ex.export_cached(&photo, &out).unwrap();

        assert_eq!(ex.renderer.render_count(), 2);
    }

    #[test]
    fn profile_change_invalidates_everything() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let store = tmp.path().join("cache.json");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        {
            let mut ex = exporter(profile(), &store);
            ex.export_cached(&photo, &out).unwrap();
        }

        // same sidecar, output still on disk, but a different target size
        let mut changed = profile();
        changed.width = 1024;
        let mut ex = exporter(changed, &store);
        ex.export_cached(&photo, &out).unwrap();

        assert_eq!(ex.renderer.render_count(), 1);
    }

    fn tagged(tag: &str) -> Substitutions {
        Substitutions {
            tag: Some(tag.to_string()),
            position: None,
        }
    }

    #[test]
    fn changed_substitutions_force_rerender() {
        // substitution values resolve into the output path template, so a
        // different tag must never reuse the previous tag's output
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        let mut config = profile();
        config.filename_format = "$(tag)/$(FILE.NAME)".to_string();
        let mut ex = exporter(config, &tmp.path().join("cache.json"));

        let landscapes = ex
            .export_cached_with(&photo, &out, &tagged("landscapes"))
            .unwrap();
        let portraits = ex
            .export_cached_with(&photo, &out, &tagged("portraits"))
            .unwrap();

        assert_eq!(ex.renderer.render_count(), 2);
        assert_ne!(portraits.path, landscapes.path);
        assert_eq!(portraits.path, out.join("portraits/IMG_0001.jpg"));
    }

    #[test]
    fn unchanged_substitutions_stay_a_hit() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        let mut config = profile();
        config.filename_format = "$(tag)/$(FILE.NAME)".to_string();
        let mut ex = exporter(config, &tmp.path().join("cache.json"));

        ex.export_cached_with(&photo, &out, &tagged("landscapes"))
            .unwrap();
        ex.export_cached_with(&photo, &out, &tagged("landscapes"))
            .unwrap();

        assert_eq!(ex.renderer.render_count(), 1);
    }

    #[test]
    fn changed_out_dir_forces_rerender() {
        let tmp = TempDir::new().unwrap();
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &tmp.path().join("out-a")).unwrap();
        let moved = ex.export_cached(&photo, &tmp.path().join("out-b")).unwrap();

        assert_eq!(ex.renderer.render_count(), 2);
        assert_eq!(moved.path, tmp.path().join("out-b/IMG_0001.jpg"));
    }

    // =========================================================================
    // Failure modes
    // =========================================================================

    #[test]
    fn missing_sidecar_is_fatal_for_the_photo() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let source = tmp.path().join("IMG_0001.cr2");
        fs::write(&source, b"raw bytes").unwrap();
        let photo = Photo::new(&source, 0);
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        let err = ex.export_cached(&photo, &out).unwrap_err();
        match err {
            ExportError::MissingSidecar { id, path } => {
                assert_eq!(id, photo.id());
                assert_eq!(path, photo.sidecar_path());
            }
            other => panic!("expected MissingSidecar, got {other:?}"),
        }
        assert_eq!(ex.renderer.render_count(), 0);
    }

    #[test]
    fn renderer_process_failure_propagates_with_identity() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.renderer.fail_next(RenderError::Process {
            status: "exit status: 1".to_string(),
            stderr: "cannot open libraw".to_string(),
        });

        let err = ex.export_cached(&photo, &out).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Render { ref id, source: RenderError::Process { .. } } if *id == photo.id()
        ));
    }

    #[test]
    fn undetermined_output_propagates() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.renderer.fail_next(RenderError::OutputUndetermined);
        let err = ex.export_cached(&photo, &out).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Render {
                source: RenderError::OutputUndetermined,
                ..
            }
        ));
    }

    #[test]
    fn failed_export_leaves_no_cache_entry() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.renderer.fail_next(RenderError::OutputUndetermined);
        assert!(ex.export_cached(&photo, &out).is_err());

        // next attempt renders (no stale hit from the failed run)
        ex.export_cached(&photo, &out).unwrap();
        assert_eq!(ex.renderer.render_count(), 2);
    }

    // =========================================================================
    // Metadata rewrite
    // =========================================================================

    #[test]
    fn metadata_is_stripped_and_rewritten() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        // the renderer will produce this path; pretend darktable embedded
        // camera metadata in it
        let realized = out.join("IMG_0001.jpg");
        ex.editor.seed(
            &realized,
            MetadataFields {
                artist: Some("CAMERA MAKER".to_string()),
                copyright: Some("factory".to_string()),
                datetime_original: Some("2023:06:01 10:30:00".to_string()),
            },
        );

        ex.export_cached(&photo, &out).unwrap();

        let fields = ex.editor.fields_for(&realized);
        assert_eq!(fields.artist.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.copyright.as_deref(), Some("© Jane Doe"));
        assert_eq!(
            fields.datetime_original.as_deref(),
            Some("2023:06:01 10:30:00"),
            "capture time must survive the strip"
        );

        let ops = ex.editor.get_operations();
        assert!(matches!(ops[0], RecordedOp::Read(_)));
        assert!(matches!(ops[1], RecordedOp::StripAll(_)));
        assert!(matches!(ops[2], RecordedOp::Write(..)));
    }

    #[test]
    fn cache_hit_skips_metadata_work() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &out).unwrap();
        let ops_after_first = ex.editor.get_operations().len();
        ex.export_cached(&photo, &out).unwrap();

        assert_eq!(ex.editor.get_operations().len(), ops_after_first);
    }

    // =========================================================================
    // Sidecar transforms
    // =========================================================================

    #[test]
    fn transforms_render_from_a_private_copy() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let sidecar_xmp = r#"<rdf:li darktable:operation="borders" darktable:enabled="1"/>"#;
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", sidecar_xmp);

        let mut config = profile();
        config.transforms = vec![SidecarTransform::DisableBorders];
        let mut ex = exporter(config, &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &out).unwrap();

        let request = &ex.renderer.get_requests()[0];
        assert_ne!(request.sidecar, photo.sidecar_path());
        let rendered_from = fs::read_to_string(&request.sidecar).unwrap();
        assert!(rendered_from.contains(r#"darktable:enabled="0""#));

        // the original sidecar is untouched
        assert_eq!(
            fs::read_to_string(photo.sidecar_path()).unwrap(),
            sidecar_xmp
        );
    }

    #[test]
    fn without_transforms_renders_from_the_original_sidecar() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &out).unwrap();
        assert_eq!(
            ex.renderer.get_requests()[0].sidecar,
            photo.sidecar_path()
        );
    }

    // =========================================================================
    // Render request construction
    // =========================================================================

    #[test]
    fn render_request_carries_profile_values() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        let mut config = profile();
        config.format_options = vec!["jpeg/quality=95".to_string()];
        let mut ex = exporter(config, &tmp.path().join("cache.json"));

        ex.export_cached(&photo, &out).unwrap();

        let request = &ex.renderer.get_requests()[0];
        assert_eq!(request.width, 2048);
        assert_eq!(request.out_ext, "jpg");
        assert_eq!(request.format_options, vec!["jpeg/quality=95"]);
        assert_eq!(request.config_dir, PathBuf::from("/dt-config"));
        assert!(
            request.out_path.ends_with("/$(FILE.NAME)"),
            "template tokens for the renderer pass through: {}",
            request.out_path
        );
    }

    // =========================================================================
    // sync: reconciliation
    // =========================================================================

    #[test]
    fn sync_deletes_orphans_and_their_cache_rows() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let store = tmp.path().join("cache.json");
        let photo_a = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit a");
        let photo_b = photo_with_sidecar(tmp.path(), "IMG_0002.cr2", "edit b");
        let photo_c = photo_with_sidecar(tmp.path(), "IMG_0003.cr2", "edit c");

        // run 1: C is part of the export set
        let c_path = {
            let mut ex = exporter(profile(), &store);
            ex.export_cached(&photo_c, &out).unwrap().path
        };
        assert!(c_path.exists());

        // run 2: only A and B are wanted; a stray jpg and a foreign raw
        // also live in the tree
        let stray = out.join("leftover.jpg");
        fs::write(&stray, b"stale").unwrap();
        let foreign_raw = out.join("original.cr2");
        fs::write(&foreign_raw, b"raw").unwrap();

        let mut ex = exporter(profile(), &store);
        let a = ex.export_cached(&photo_a, &out).unwrap();
        let b = ex.export_cached(&photo_b, &out).unwrap();

        let report = ex.sync(&out).unwrap();

        assert!(!c_path.exists(), "orphaned export must be deleted");
        assert!(!stray.exists(), "stray non-raw file must be deleted");
        assert!(foreign_raw.exists(), "raw files are never deleted");
        assert!(a.path.exists());
        assert!(b.path.exists());
        assert_eq!(report.removed_files, 2);
        assert_eq!(report.removed_entries, 1, "only C had cache rows");

        // C's rows are gone: exporting it again renders
        ex.export_cached(&photo_c, &out).unwrap();
        assert_eq!(ex.renderer.render_count(), 3);
    }

    #[test]
    fn sync_twice_removes_nothing_the_second_time() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let photo_a = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit a");
        let photo_b = photo_with_sidecar(tmp.path(), "IMG_0002.cr2", "edit b");
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));

        let a = ex.export_cached(&photo_a, &out).unwrap();
        let b = ex.export_cached(&photo_b, &out).unwrap();

        ex.sync(&out).unwrap();
        let second = ex.sync(&out).unwrap();

        assert_eq!(second, SyncReport::default());
        assert!(a.path.exists());
        assert!(b.path.exists());
    }

    #[test]
    fn sync_protects_hits_as_well_as_renders() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let store = tmp.path().join("cache.json");
        let photo = photo_with_sidecar(tmp.path(), "IMG_0001.cr2", "edit v1");

        let path = {
            let mut ex = exporter(profile(), &store);
            ex.export_cached(&photo, &out).unwrap().path
        };

        // new run, cache hit only — the file must still be protected
        let mut ex = exporter(profile(), &store);
        ex.export_cached(&photo, &out).unwrap();
        assert_eq!(ex.renderer.render_count(), 0);
        ex.sync(&out).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn sync_on_missing_directory_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let mut ex = exporter(profile(), &tmp.path().join("cache.json"));
        let report = ex.sync(&tmp.path().join("never-created")).unwrap();
        assert_eq!(report, SyncReport::default());
    }

    // =========================================================================
    // Export result
    // =========================================================================

    #[test]
    fn export_dimensions_are_probed_lazily() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.png");
        image::RgbImage::new(4, 3).save(&path).unwrap();

        let export = Export::new(Photo::new("/photos/a.cr2", 0).id(), path);
        assert_eq!(export.dimensions().unwrap(), (4, 3));
        assert!((export.aspect_ratio().unwrap() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn probe_of_non_image_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jpg");
        fs::write(&path, b"not an image").unwrap();

        let export = Export::new(Photo::new("/photos/a.cr2", 0).id(), path);
        assert!(matches!(
            export.dimensions(),
            Err(ExportError::Probe { .. })
        ));
    }

    // =========================================================================
    // posix_join
    // =========================================================================

    #[test]
    fn posix_join_trims_trailing_slash() {
        assert_eq!(
            posix_join(Path::new("/out/"), "$(FILE.NAME)"),
            "/out/$(FILE.NAME)"
        );
        assert_eq!(posix_join(Path::new("/out"), "x"), "/out/x");
    }
}
