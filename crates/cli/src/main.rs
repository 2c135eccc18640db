//! upsync: Incremental self-updater
//!
//! Keeps an installation directory in sync with a version published on a
//! mirror:
//! - Content hashing (xxh64) with a trusted `version.json` sidecar
//! - Ignore patterns that protect user files
//! - Parallel, resumable downloads of changed files only
//! - Full reinstall from the version archive for large changes

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};
use tracing::{debug, info};

use upsync_core::config::CONFIG_FILE;
use upsync_core::{
    Diff, InstallPolicy, InstallTarget, Scanner, Updater, UpdaterConfig, VersionManifest,
};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

/// Paths listed per diff category before collapsing to a count
const LIST_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "upsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync an installation with a version published on a mirror")]
#[command(long_about = r#"
upsync updates an installed application in place from a mirror.

Only files whose content changed are downloaded. Files matching the
configured ignore patterns (user settings, logs, screenshots) are never
touched. Interrupted updates resume where they stopped.

Examples:
  upsync versions                        List published versions
  upsync diff 2024-04-15 --dir ./app     Show what an update would change
  upsync install 2024-04-15 --dir ./app  Update ./app to that version
  upsync publish ./build                 Write version.json for a release
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Mirror URL or directory, overriding the config file
    #[arg(short, long, global = true)]
    mirror: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List versions published on the mirror
    Versions,

    /// Show what installing a version would change
    Diff {
        /// Version identifier
        version: String,

        /// Installation directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Hash the installation instead of trusting version.json
        #[arg(long)]
        rehash: bool,
    },

    /// Install a version, downloading only what changed
    Install {
        /// Version identifier
        version: String,

        /// Installation directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Hash the installation instead of trusting version.json
        #[arg(long)]
        rehash: bool,

        /// Concurrent downloads
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Hash a directory and print its manifest
    Hash {
        /// Directory to hash
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,
    },

    /// Write version.json for a directory about to be published
    Publish {
        /// Directory to publish
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Write it back to the config file, command-line overrides included
        #[arg(long)]
        save: bool,
    },

    /// Show version and build info
    Version,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Summary,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session = debug_log::init(cli.verbose);
    debug!(log = %session.path.display(), "session started");

    let code = run(cli).await;
    drop(session.guard);
    code
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Version => {
            eprintln!("upsync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Hash { ref path, format } => {
            hash_command(path, format)?;
        }
        Commands::Publish { ref path } => {
            publish_command(path)?;
        }
        Commands::Config { save } => {
            let config = load_config(&cli.config, cli.mirror.as_deref(), None)?;
            print!("{}", config.to_toml()?);
            if save {
                config
                    .save(&cli.config)
                    .wrap_err_with(|| format!("saving {}", cli.config.display()))?;
                progress::print_status("Saved", &cli.config.display().to_string());
            }
        }
        Commands::Versions => {
            let config = load_config(&cli.config, cli.mirror.as_deref(), None)?;
            versions_command(config).await?;
        }
        Commands::Diff {
            ref version,
            ref dir,
            rehash,
        } => {
            let mut config = load_config(&cli.config, cli.mirror.as_deref(), dir.as_deref())?;
            config.trust_sidecar &= !rehash;
            diff_command(config, version).await?;
        }
        Commands::Install {
            ref version,
            ref dir,
            rehash,
            jobs,
        } => {
            let mut config = load_config(&cli.config, cli.mirror.as_deref(), dir.as_deref())?;
            config.trust_sidecar &= !rehash;
            if let Some(jobs) = jobs {
                config.pool_limit = jobs;
            }
            config.validate()?;
            return install_command(config, version).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Load the config file and apply command-line overrides
fn load_config(path: &Path, mirror: Option<&str>, dir: Option<&Path>) -> Result<UpdaterConfig> {
    let mut config =
        UpdaterConfig::load(path).wrap_err_with(|| format!("loading {}", path.display()))?;
    if let Some(mirror) = mirror {
        config.mirror = mirror.to_string();
    }
    if let Some(dir) = dir {
        config.install_dir = dir.to_path_buf();
    }
    Ok(config)
}

fn open_session(config: UpdaterConfig) -> Result<Updater<dyn upsync_core::Mirror>> {
    let mirror = upsync_mirror::open(&config.mirror, &config)?;
    Ok(Updater::new(mirror, config))
}

fn install_target(config: &UpdaterConfig) -> Result<InstallTarget> {
    if config.install_dir.as_os_str().is_empty() {
        bail!("no installation directory: pass --dir or set install_dir in {CONFIG_FILE}");
    }
    Ok(InstallTarget::from_config(config))
}

async fn versions_command(config: UpdaterConfig) -> Result<()> {
    progress::print_status("Listing", &config.mirror);
    let mut updater = open_session(config)?;
    let versions = updater.fetch_versions().await?;

    if versions.is_empty() {
        info!("no versions published");
    }
    for version in &versions {
        println!("{}", version.display_name());
    }
    Ok(())
}

async fn diff_command(config: UpdaterConfig, version: &str) -> Result<()> {
    let target = install_target(&config)?;
    let mut updater = open_session(config)?;
    let plan = updater.plan(version, &target).await?;

    progress::InstallProgress::new().planned(&plan, &target.root);
    print!("{}", render_diff(&plan.diff, LIST_LIMIT));
    Ok(())
}

async fn install_command(config: UpdaterConfig, version: &str) -> Result<ExitCode> {
    let target = install_target(&config)?;
    let mut updater = open_session(config)?;
    let progress = progress::InstallProgress::new();

    let plan = updater.plan(version, &target).await?;
    progress.planned(&plan, &target.root);

    let bar = match plan.policy {
        InstallPolicy::Incremental => progress.fetch_bar(plan.diff.fetch_count() as u64),
        InstallPolicy::FullReinstall => progress.archive_spinner(version),
    };
    let total = plan.diff.fetch_count();

    let result = updater
        .apply(plan, &target, |p| {
            bar.set_position(total.saturating_sub(p.remaining) as u64);
            bar.set_prefix(p.path.to_string());
        })
        .await;
    bar.finish_and_clear();

    let report = result?;
    progress.finish(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn hash_command(path: &Path, format: OutputFormat) -> Result<()> {
    info!("Hashing {}...", path.display());
    let manifest = Scanner::new(path).scan()?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Summary => {
            println!("Files: {}", manifest.len());
            if manifest.len() <= LIST_LIMIT {
                println!("\nFiles:");
                for (path, digest) in manifest.iter() {
                    println!("  {digest}  {path}");
                }
            }
        }
    }
    Ok(())
}

fn publish_command(path: &Path) -> Result<()> {
    let manifest = VersionManifest::publish(path)?;
    manifest.write_sidecar(path)?;
    progress::print_status(
        "Published",
        &format!("{} files at {} ({})", manifest.hash.len(), path.display(), manifest.time),
    );
    Ok(())
}

/// Human-readable diff: counts, plus paths for small categories
fn render_diff(diff: &Diff, limit: usize) -> String {
    let sections = [
        ("new", '+', &diff.new),
        ("changed", '~', &diff.replace),
        ("removed", '-', &diff.remove),
        ("ignored", ' ', &diff.ignored),
    ];

    let mut out = String::new();
    for (label, marker, paths) in sections {
        out.push_str(&format!("{label}: {}\n", paths.len()));
        if paths.len() <= limit {
            for path in paths {
                out.push_str(&format!("  {marker} {path}\n"));
            }
        }
    }
    out
}
