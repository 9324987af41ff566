//! Export profile configuration.
//!
//! One TOML file describes everything that influences rendering output —
//! the darktable-cli binary, the config directory the library lives in,
//! the output naming template, format, size, resampling, the embedded
//! artist/copyright fields, and any sidecar transforms. The whole profile
//! feeds the configuration fingerprint (see [`ProfileConfig::fingerprint`]),
//! so editing any value here invalidates every cached export decision on
//! the next run.
//!
//! ```toml
//! # export.toml
//! cache_key = "portfolio"
//! config_dir = "/home/user/.config/darktable"
//! filename_format = "$(FILE.NAME)"
//! out_ext = "jpg"
//! format_options = ["jpeg/quality=95"]
//! width = 2048
//! height = 2048
//! artist = "Jane Doe"
//! copyright = "© Jane Doe, all rights reserved"
//! transforms = ["disable-borders"]
//! ```
//!
//! `cli_bin` defaults to `darktable-cli` on `$PATH`; `hq_resampling`
//! defaults to on.

use crate::fingerprint::fingerprint;
use crate::sidecar::SidecarTransform;
use crate::template::{OutputTemplate, TemplateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse profile: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

/// One export profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Scopes this profile's namespaces inside the shared store, so
    /// several profiles (say `portfolio` and `prints`) can cache
    /// independently in one file. Must not contain `:`, the namespace
    /// separator.
    #[serde(default = "default_cache_key")]
    pub cache_key: String,
    #[serde(default = "default_cli_bin")]
    pub cli_bin: PathBuf,
    /// darktable config directory holding `library.db` and `data.db`.
    pub config_dir: PathBuf,
    #[serde(default = "default_filename_format")]
    pub filename_format: String,
    #[serde(default = "default_out_ext")]
    pub out_ext: String,
    /// `plugins/imageio/format/…` overrides passed via `--conf`.
    #[serde(default)]
    pub format_options: Vec<String>,
    #[serde(default = "default_true")]
    pub hq_resampling: bool,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub transforms: Vec<SidecarTransform>,
}

fn default_cache_key() -> String {
    "export".to_string()
}

fn default_cli_bin() -> PathBuf {
    PathBuf::from("darktable-cli")
}

fn default_filename_format() -> String {
    "$(FILE.NAME)".to_string()
}

fn default_out_ext() -> String {
    "jpg".to_string()
}

fn default_true() -> bool {
    true
}

impl ProfileConfig {
    /// Load and validate a profile from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject profiles that cannot produce a working invocation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        OutputTemplate::parse(&self.filename_format)?;
        // ':' separates namespaces in the store; a key like "a:xmp" would
        // make its namespaces collide with profile "a"'s
        if self.cache_key.is_empty() || self.cache_key.contains(':') {
            return Err(ConfigError::Invalid(
                "cache_key must be non-empty and must not contain ':'".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "width and height must be nonzero".to_string(),
            ));
        }
        if self.out_ext.is_empty() {
            return Err(ConfigError::Invalid("out_ext must not be empty".to_string()));
        }
        Ok(())
    }

    /// Digest over every render-affecting value in this profile.
    ///
    /// A change to any of these makes previously cached outputs
    /// unreproducible from current inputs, so the export cache compares
    /// this against the stored digest on open and prunes on mismatch.
    pub fn fingerprint(&self) -> String {
        let cli_bin = self.cli_bin.to_string_lossy();
        let config_dir = self.config_dir.to_string_lossy();
        let format_options = self.format_options.join(",");
        let width = self.width.to_string();
        let height = self.height.to_string();
        let transforms = self
            .transforms
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(",");

        fingerprint(
            &[],
            &[
                ("cli_bin", Some(&cli_bin)),
                ("config_dir", Some(&config_dir)),
                ("filename_format", Some(&self.filename_format)),
                ("out_ext", Some(&self.out_ext)),
                ("format_options", Some(&format_options)),
                (
                    "hq_resampling",
                    Some(if self.hq_resampling { "true" } else { "false" }),
                ),
                ("width", Some(&width)),
                ("height", Some(&height)),
                ("artist", self.artist.as_deref()),
                ("copyright", self.copyright.as_deref()),
                ("transforms", Some(&transforms)),
            ],
        )
    }
}

/// Split a format-option string on commas, semicolons, and whitespace.
///
/// Profiles normally use a TOML list, but a single string form
/// (`"jpeg/quality=95, jpeg/subsample=4:4:4"`) is accepted on the command
/// line.
pub fn parse_format_options(options: &str) -> Vec<String> {
    options
        .split([',', ';', ' ', '\t', '\n'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
