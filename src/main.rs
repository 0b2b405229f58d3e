//! bloompack - BloomPub package integrity and bundling

use std::path::PathBuf;

use anyhow::{Context, Result};
use bloompack::archive::{self, ArchiveValidator, CheckMode, ContentProbe};
use bloompack::bundle;
use bloompack::config::AppConfig;
use bloompack::source::{ArchiveSource, FileSource};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bloompack")]
#[command(version)]
#[command(about = "Validate, extract, and bundle BloomPub book packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Validation cache database (defaults to the user config directory)
    #[arg(long, global = true, env = "BLOOMPACK_CACHE")]
    cache: Option<PathBuf>,

    /// Do not read or write the validation cache
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a file is a valid package
    Validate {
        /// Path to the .bloompub/.bloomd file
        file: PathBuf,

        /// Require book package content (one root html file, at least one css file)
        #[arg(long)]
        strict: bool,

        /// Print the text of this entry (e.g. meta.json) if present
        #[arg(long)]
        probe: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract a package into a directory
    Extract {
        /// Path to the .bloompub/.bloomd file
        file: PathBuf,

        /// Target directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Pack every book and shelf in a directory into a .bloombundle
    Bundle {
        /// Directory holding .bloompub/.bloomd/.bloomshelf files
        books_dir: PathBuf,

        /// Bundle file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Unpack a .bloombundle into a directory
    Unpack {
        /// Path to the .bloombundle file
        bundle: PathBuf,

        /// Target directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(if cli.verbose {
                    "bloompack=debug".parse()?
                } else {
                    "bloompack=warn".parse()?
                }),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    let config = AppConfig {
        cache_path: cli.cache,
        no_cache: cli.no_cache,
    };
    config.validate()?;

    match cli.command {
        Commands::Validate {
            file,
            strict,
            probe,
            json,
        } => {
            let validator = match config.open_cache() {
                Some(cache) => ArchiveValidator::new(cache),
                None => ArchiveValidator::without_cache(),
            };
            let mode = if strict {
                CheckMode::BloomPub
            } else {
                CheckMode::Zip
            };
            let mut probe = probe.map(|name| ContentProbe::utf8(&name));
            let source = FileSource::new(&file);

            let result = validator.check(&source, mode, probe.as_mut());
            let content = probe.as_ref().and_then(|p| p.content());

            if json {
                let report = match &result {
                    Ok(summary) => serde_json::json!({
                        "file": source.identity(),
                        "valid": true,
                        "summary": summary,
                        "probe": content,
                    }),
                    Err(e) => serde_json::json!({
                        "file": source.identity(),
                        "valid": false,
                        "error": e.to_string(),
                        "kind": format!("{:?}", e.kind()),
                    }),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match &result {
                    Ok(summary) if summary.from_cache => {
                        println!("{}: valid (unchanged since last check)", file.display());
                    }
                    Ok(summary) => {
                        println!(
                            "{}: valid ({} entries, {} root html, {} css)",
                            file.display(),
                            summary.entries,
                            summary.root_markup,
                            summary.stylesheets
                        );
                    }
                    Err(e) => println!("{}: INVALID - {}", file.display(), e),
                }
                if let Some(text) = content {
                    println!("\n{}", text);
                }
            }

            if result.is_err() {
                std::process::exit(1);
            }
        }

        Commands::Extract { file, output } => {
            let stats = archive::extract(&FileSource::new(&file), &output)
                .with_context(|| format!("Failed to extract {}", file.display()))?;
            println!(
                "Extracted {} files, {} directories ({} bytes) to {}",
                stats.files,
                stats.directories,
                stats.bytes,
                output.display()
            );
        }

        Commands::Bundle { books_dir, output } => {
            let stats = bundle::make_bloom_bundle(&books_dir, &output)
                .with_context(|| format!("Failed to bundle {}", books_dir.display()))?;
            println!(
                "Bundled {} files ({} renamed to .bloomd, {} skipped) into {}",
                stats.entries,
                stats.renamed,
                stats.skipped,
                output.display()
            );
        }

        Commands::Unpack { bundle, output } => {
            let written = bundle::unpack_bundle(&bundle, &output)
                .with_context(|| format!("Failed to unpack {}", bundle.display()))?;
            for path in &written {
                println!("{}", path.display());
            }
            eprintln!("\nTotal: {} files", written.len());
        }
    }

    Ok(())
}
