use clap::{Parser, Subcommand};
use dtexport::catalog::Photo;
use dtexport::config::ProfileConfig;
use dtexport::exporter::Exporter;
use dtexport::metadata::ExifToolEditor;
use dtexport::renderer::DarktableCli;
use std::path::PathBuf;

/// Release builds report the crate version; dev builds report the commit.
fn version_string() -> &'static str {
    if env!("ON_RELEASE_TAG") == "true" {
        return env!("CARGO_PKG_VERSION");
    }
    match env!("GIT_HASH") {
        "" => "dev@unknown",
        hash => Box::leak(format!("dev@{hash}").into_boxed_str()),
    }
}

#[derive(Parser)]
#[command(name = "dtexport")]
#[command(about = "Incremental batch export for darktable libraries")]
#[command(long_about = "\
Incremental batch export for darktable libraries

Renders photos through darktable-cli according to a TOML export profile,
skipping photos whose XMP sidecar is unchanged since the last run. Embedded
metadata on exported files is stripped and replaced by the profile's
artist/copyright plus the original capture timestamp.

Photos are read from a JSON manifest:

  [
    {\"source_path\": \"/photos/roll1/IMG_0001.cr2\", \"version\": 0},
    {\"source_path\": \"/photos/roll1/IMG_0002.cr2\"}
  ]

With --sync --delete, after exporting, every non-raw file in the output
directory that this run did not produce or confirm is DELETED. Raw files
are always preserved.")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export photos, reusing cached outputs where possible
    Export {
        /// JSON manifest of photos to export
        #[arg(long)]
        photos: PathBuf,

        /// Output directory
        #[arg(long)]
        out_dir: PathBuf,

        /// Export profile (TOML)
        #[arg(long)]
        profile: PathBuf,

        /// Cache store file
        #[arg(long, default_value = ".dtexport-cache.json")]
        store: PathBuf,

        /// Override the profile's format options, e.g. "jpeg/quality=95"
        /// (comma/semicolon/space separated)
        #[arg(long)]
        format_options: Option<String>,

        /// After exporting, reconcile the output directory (requires --delete)
        #[arg(long, requires = "delete")]
        sync: bool,

        /// Confirm that reconciliation may delete files
        #[arg(long)]
        delete: bool,
    },
    /// Validate an export profile without rendering anything
    Check {
        /// Export profile (TOML)
        #[arg(long)]
        profile: PathBuf,
    },
    /// Print the configuration fingerprint of a profile
    Fingerprint {
        /// Export profile (TOML)
        #[arg(long)]
        profile: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Export {
            photos,
            out_dir,
            profile,
            store,
            format_options,
            sync,
            delete,
        } => {
            let mut profile = ProfileConfig::load(&profile)?;
            if let Some(options) = format_options {
                profile.format_options = dtexport::config::parse_format_options(&options);
            }
            let manifest = std::fs::read_to_string(&photos)?;
            let photos: Vec<Photo> = serde_json::from_str(&manifest)?;

            let renderer = DarktableCli::new(&profile.cli_bin);
            let editor = ExifToolEditor::new();
            let mut exporter = Exporter::new(profile, &store, renderer, editor)?;

            let total = photos.len();
            let mut failures = 0usize;
            for photo in &photos {
                match exporter.export_cached(photo, &out_dir) {
                    Ok(export) => println!("{} -> {}", export.id, export.path.display()),
                    Err(e) => {
                        log::error!("{}: {e}", photo.id());
                        eprintln!("FAILED {}: {e}", photo.id());
                        failures += 1;
                    }
                }
            }
            println!("Exported {}/{total} photos", total - failures);

            if sync && delete {
                let report = exporter.sync(&out_dir)?;
                println!(
                    "Sync: removed {} files, {} cache entries",
                    report.removed_files, report.removed_entries
                );
            }

            if failures > 0 {
                return Err(format!("{failures} photo(s) failed to export").into());
            }
        }
        Command::Check { profile } => {
            let config = ProfileConfig::load(&profile)?;
            println!("Profile is valid");
            println!("  cache_key:   {}", config.cache_key);
            println!("  output:      {} ({}x{})", config.out_ext, config.width, config.height);
            println!("  fingerprint: {}", config.fingerprint());
        }
        Command::Fingerprint { profile } => {
            let config = ProfileConfig::load(&profile)?;
            println!("{}", config.fingerprint());
        }
    }

    Ok(())
}
