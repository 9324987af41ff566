//! Embedded metadata editing on exported files.
//!
//! Exported files must never leak unrelated embedded metadata (GPS
//! positions, serial numbers, full edit history), but should keep the
//! original capture timestamp and carry the configured artist/copyright.
//! The export path therefore reads the original fields, strips everything,
//! and writes back exactly three fields (see
//! [`crate::exporter::Exporter::export`]).
//!
//! The [`MetadataEditor`] trait keeps the rest of the codebase agnostic of
//! how that happens. The production implementation, [`ExifToolEditor`],
//! shells out to [exiftool](https://exiftool.org/) — the one tool that
//! reliably round-trips every maker-note dialect. Tests use the recording
//! mock in [`tests`].

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("exiftool failed ({status}): {stderr}")]
    Tool { status: String, stderr: String },
    #[error("unexpected exiftool output: {0}")]
    Output(String),
}

/// The three fields an exported file is allowed to carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFields {
    pub artist: Option<String>,
    pub copyright: Option<String>,
    /// Capture timestamp in EXIF form (`YYYY:MM:DD HH:MM:SS`). Preserved
    /// from the pre-strip metadata, never rewritten to export time.
    pub datetime_original: Option<String>,
}

/// Read, strip, and write embedded metadata on an output file.
pub trait MetadataEditor {
    /// Read the supported fields from `path`.
    fn read(&self, path: &Path) -> Result<MetadataFields, MetadataError>;

    /// Remove all embedded metadata from `path` in place.
    fn strip_all(&self, path: &Path) -> Result<(), MetadataError>;

    /// Write the given fields to `path` in place. `None` fields are left
    /// unwritten.
    fn write(&self, path: &Path, fields: &MetadataFields) -> Result<(), MetadataError>;
}

/// Production editor backed by the `exiftool` binary.
#[derive(Debug, Clone)]
pub struct ExifToolEditor {
    bin: PathBuf,
}

impl ExifToolEditor {
    pub fn new() -> Self {
        Self {
            bin: PathBuf::from("exiftool"),
        }
    }

    pub fn with_bin(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn run(&self, args: &[&str], path: &Path) -> Result<String, MetadataError> {
        let output = Command::new(&self.bin).args(args).arg(path).output()?;
        if !output.status.success() {
            return Err(MetadataError::Tool {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ExifToolEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataEditor for ExifToolEditor {
    fn read(&self, path: &Path) -> Result<MetadataFields, MetadataError> {
        let stdout = self.run(
            &["-json", "-Artist", "-Copyright", "-DateTimeOriginal"],
            path,
        )?;
        // exiftool -json prints one object per input file
        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&stdout).map_err(|_| MetadataError::Output(stdout.clone()))?;
        let object = parsed
            .first()
            .ok_or_else(|| MetadataError::Output(stdout.clone()))?;

        let field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Ok(MetadataFields {
            artist: field("Artist"),
            copyright: field("Copyright"),
            datetime_original: field("DateTimeOriginal"),
        })
    }

    fn strip_all(&self, path: &Path) -> Result<(), MetadataError> {
        self.run(&["-all=", "-overwrite_original"], path)?;
        Ok(())
    }

    fn write(&self, path: &Path, fields: &MetadataFields) -> Result<(), MetadataError> {
        let mut args: Vec<String> = vec!["-overwrite_original".to_string()];
        if let Some(artist) = &fields.artist {
            args.push(format!("-Artist={artist}"));
        }
        if let Some(copyright) = &fields.copyright {
            args.push(format!("-Copyright={copyright}"));
        }
        if let Some(dto) = &fields.datetime_original {
            args.push(format!("-DateTimeOriginal={dto}"));
        }
        if args.len() == 1 {
            return Ok(());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, path)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock editor that keeps per-path fields in memory and records every
    /// operation. Uses Mutex so it is usable behind `&self`.
    #[derive(Default)]
    pub struct MockEditor {
        pub fields: Mutex<HashMap<PathBuf, MetadataFields>>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Read(PathBuf),
        StripAll(PathBuf),
        Write(PathBuf, MetadataFields),
    }

    impl MockEditor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-populate the embedded metadata for a path, as if the
        /// renderer had produced a file carrying it.
        pub fn seed(&self, path: impl Into<PathBuf>, fields: MetadataFields) {
            self.fields.lock().unwrap().insert(path.into(), fields);
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn fields_for(&self, path: &Path) -> MetadataFields {
            self.fields
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or_default()
        }
    }

    impl MetadataEditor for MockEditor {
        fn read(&self, path: &Path) -> Result<MetadataFields, MetadataError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Read(path.to_path_buf()));
            Ok(self.fields_for(path))
        }

        fn strip_all(&self, path: &Path) -> Result<(), MetadataError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::StripAll(path.to_path_buf()));
            self.fields
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), MetadataFields::default());
            Ok(())
        }

        fn write(&self, path: &Path, fields: &MetadataFields) -> Result<(), MetadataError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Write(path.to_path_buf(), fields.clone()));
            let mut map = self.fields.lock().unwrap();
            let entry = map.entry(path.to_path_buf()).or_default();
            if fields.artist.is_some() {
                entry.artist = fields.artist.clone();
            }
            if fields.copyright.is_some() {
                entry.copyright = fields.copyright.clone();
            }
            if fields.datetime_original.is_some() {
                entry.datetime_original = fields.datetime_original.clone();
            }
            Ok(())
        }
    }

    // =========================================================================
    // Mock behavior (the strip/rewrite contract the exporter relies on)
    // =========================================================================

    #[test]
    fn strip_then_write_preserves_only_written_fields() {
        let editor = MockEditor::new();
        let path = Path::new("/out/photo.jpg");
        editor.seed(
            path,
            MetadataFields {
                artist: Some("Camera Default".to_string()),
                copyright: None,
                datetime_original: Some("2023:06:01 10:30:00".to_string()),
            },
        );

        let original = editor.read(path).unwrap();
        editor.strip_all(path).unwrap();
        editor
            .write(
                path,
                &MetadataFields {
                    artist: Some("Jane Doe".to_string()),
                    copyright: Some("© Jane Doe".to_string()),
                    datetime_original: original.datetime_original.clone(),
                },
            )
            .unwrap();

        let result = editor.fields_for(path);
        assert_eq!(result.artist.as_deref(), Some("Jane Doe"));
        assert_eq!(result.copyright.as_deref(), Some("© Jane Doe"));
        // capture time survives exactly
        assert_eq!(
            result.datetime_original.as_deref(),
            Some("2023:06:01 10:30:00")
        );
    }

    #[test]
    fn mock_records_operation_order() {
        let editor = MockEditor::new();
        let path = Path::new("/out/photo.jpg");

        editor.read(path).unwrap();
        editor.strip_all(path).unwrap();
        editor.write(path, &MetadataFields::default()).unwrap();

        let ops = editor.get_operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], RecordedOp::Read(_)));
        assert!(matches!(ops[1], RecordedOp::StripAll(_)));
        assert!(matches!(ops[2], RecordedOp::Write(..)));
    }

    // =========================================================================
    // ExifToolEditor (no exiftool binary required)
    // =========================================================================

    #[test]
    fn exiftool_read_parses_json_output() {
        let stdout = r#"[{
            "SourceFile": "/out/photo.jpg",
            "Artist": "Jane Doe",
            "DateTimeOriginal": "2023:06:01 10:30:00"
        }]"#;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(stdout).unwrap();
        let object = parsed.first().unwrap();
        assert_eq!(
            object.get("Artist").and_then(|v| v.as_str()),
            Some("Jane Doe")
        );
        assert_eq!(object.get("Copyright"), None);
    }

    #[test]
    fn exiftool_missing_binary_is_an_error() {
        let editor = ExifToolEditor::with_bin("/nonexistent/exiftool");
        assert!(editor.read(Path::new("/out/photo.jpg")).is_err());
    }
}
