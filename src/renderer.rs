//! Rendering backend: darktable-cli invocation.
//!
//! The [`Renderer`] trait is the seam between the export engine and the
//! actual pixel pipeline. The production implementation, [`DarktableCli`],
//! spawns `darktable-cli` once per photo and parses the realized output
//! path from its stdout — darktable resolves `$(FILE.NAME)`-style
//! variables and uniquifies clashing filenames itself, so the path it
//! reports is the only authoritative answer.
//!
//! No timeout or cancellation is modeled: a hung renderer hangs the run.
//! Failures are fatal for that photo and propagate to the caller; there is
//! no retry.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("renderer failed ({status}): {stderr}")]
    Process { status: String, stderr: String },
    #[error("could not determine the exported file path from renderer output")]
    OutputUndetermined,
}

/// One render invocation: a photo, its sidecar, and the output parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub source: PathBuf,
    /// Sidecar to render from. May be a transformed temporary copy rather
    /// than the photo's own sidecar.
    pub sidecar: PathBuf,
    /// Output path template, already joined under the output directory.
    /// darktable-cli requires forward slashes here, and expands any
    /// remaining `$(…)` variables itself.
    pub out_path: String,
    pub width: u32,
    pub height: u32,
    pub out_ext: String,
    pub hq_resampling: bool,
    /// `plugins/imageio/format/…` overrides, e.g. `jpeg/quality=95`.
    pub format_options: Vec<String>,
    /// darktable config directory (`--core --configdir`).
    pub config_dir: PathBuf,
}

/// Turns a [`RenderRequest`] into an output file on disk, reporting the
/// realized path.
pub trait Renderer {
    fn render(&self, request: &RenderRequest) -> Result<PathBuf, RenderError>;
}

/// darktable-cli's "exported to `/path/file.jpg'" stdout line.
static EXPORTED_TO: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"exported to `([^']+)'").expect("valid regex"));

/// Production renderer driving the `darktable-cli` binary.
#[derive(Debug, Clone)]
pub struct DarktableCli {
    bin: PathBuf,
}

impl DarktableCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// The full argument vector for a request (binary excluded).
    ///
    /// See the darktable-cli program-invocation docs for the grammar:
    /// `<input> <xmp> <output> [options] --core [darktable options]`.
    pub fn argv(&self, request: &RenderRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            request.source.as_os_str().to_os_string(),
            request.sidecar.as_os_str().to_os_string(),
            OsString::from(&request.out_path),
            OsString::from("--width"),
            OsString::from(request.width.to_string()),
            OsString::from("--height"),
            OsString::from(request.height.to_string()),
            OsString::from("--out-ext"),
            OsString::from(&request.out_ext),
            OsString::from("--hq"),
            OsString::from(if request.hq_resampling { "true" } else { "false" }),
            OsString::from("--upscale"),
            OsString::from("false"),
            OsString::from("--apply-custom-presets"),
            OsString::from("false"),
            OsString::from("--core"),
            OsString::from("--configdir"),
            request.config_dir.as_os_str().to_os_string(),
        ];
        for option in &request.format_options {
            args.push(OsString::from("--conf"));
            args.push(OsString::from(format!("plugins/imageio/format/{option}")));
        }
        args
    }

    /// Extract the realized output path from darktable-cli stdout.
    fn parse_output_path(stdout: &str) -> Result<PathBuf, RenderError> {
        EXPORTED_TO
            .captures(stdout)
            .map(|caps| PathBuf::from(&caps[1]))
            .ok_or(RenderError::OutputUndetermined)
    }
}

impl Renderer for DarktableCli {
    fn render(&self, request: &RenderRequest) -> Result<PathBuf, RenderError> {
        let args = self.argv(request);
        log::debug!(
            "render: {} {}",
            self.bin.display(),
            args.iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = Command::new(&self.bin).args(&args).output()?;
        if !output.status.success() {
            return Err(RenderError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_output_path(&stdout)
    }
}
