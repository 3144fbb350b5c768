use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::{info, warn};

use spacenet::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use spacenet::tracker::DirectoryTracker;

/// Directory-tracking content indexer.
///
/// Watches a directory tree and maintains a content-addressed index of its
/// files (whole-file and per-block CDC-512 digests) in a per-root SQLite
/// store under `{home}/.spacenet`.
#[derive(Parser, Debug)]
#[command(name = "spacenet", version, about)]
struct Args {
    /// Directory tree to track
    #[arg(long, value_name = "DIR")]
    path: Utf8PathBuf,

    /// Free-form label used to derive the store name (defaults to the path)
    #[arg(long, value_name = "LABEL")]
    name: Option<String>,

    /// Run a single reindex cycle and exit
    #[arg(long)]
    once: bool,

    /// Rehash every file even when its mtime is unchanged
    #[arg(long)]
    full: bool,

    /// Store directory override (default: {home}/.spacenet)
    #[arg(long, value_name = "DIR")]
    store_dir: Option<Utf8PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Log format
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// JSON file with a full logging configuration (overrides the log flags)
    #[arg(long, value_name = "FILE")]
    log_config: Option<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = match &args.log_config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => LogConfig {
            level: args.log_level,
            format: args.log_format,
            ..Default::default()
        },
    };
    init_logging(&log_config)?;

    let mut tracker = DirectoryTracker::new(args.path.clone());
    if let Some(name) = args.name {
        tracker = tracker.with_user_defined_name(name);
    }
    if let Some(dir) = args.store_dir {
        tracker = tracker.with_store_dir(dir);
    }
    tracker.set_modified_only(!args.full);

    if args.once {
        tracker.reindex_once()?;
        if let Some(store) = tracker.db_path_name() {
            info!(store = %store, "reindex complete");
        }
        return Ok(());
    }

    tracker.run()?;
    eprintln!("tracking {} (press Enter to stop)", args.path);
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    tracker.shutdown();
    if let Some(error) = tracker.last_error() {
        warn!(error = %error, "last recorded cycle error");
    }
    Ok(())
}
