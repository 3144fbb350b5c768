//! Per-root tracking worker: owns the store connection and runs reindex
//! cycles on a timer until shut down.
//!
//! Each tracked root gets its own store at
//! `{home}/.spacenet/{derived-name}.sqlite`. One dedicated thread owns the
//! connection; the controller only touches the shutdown flag, the wake-up
//! channel, and the shared error slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::anyhow_loc;
use crate::cdc512::Cdc512;
use crate::indexer::DirectoryIndexer;
use crate::pathutil::{home_path, mkdir, sanitize_name};

/// Wait between reindex cycles. The extra 100 ms keeps the wake-ups from
/// beating against minute-aligned cron-style activity on the host.
const CYCLE_PERIOD: Duration = Duration::from_millis(60_100);

/// Directory under the user's home holding all per-root stores.
const STORE_DIR_NAME: &str = ".spacenet";

pub struct DirectoryTracker {
    dir_user_defined_name: String,
    dir_path_name: Utf8PathBuf,
    modified_only: bool,
    store_dir_override: Option<Utf8PathBuf>,
    db_path_name: Option<Utf8PathBuf>,

    error: Arc<Mutex<Option<String>>>,
    shutdown_flag: Arc<AtomicBool>,
    wake_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

struct WorkerContext {
    dir_path_name: Utf8PathBuf,
    db_path_name: Utf8PathBuf,
    modified_only: bool,
    shutdown: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    wake_rx: Receiver<()>,
}

impl DirectoryTracker {
    pub fn new(dir_path_name: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir_user_defined_name: String::new(),
            dir_path_name: dir_path_name.into(),
            modified_only: true,
            store_dir_override: None,
            db_path_name: None,
            error: Arc::new(Mutex::new(None)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            wake_tx: None,
            worker: None,
        }
    }

    /// Free-form label for the tracked root; used instead of the path when
    /// deriving the store name.
    #[must_use]
    pub fn with_user_defined_name(mut self, name: impl Into<String>) -> Self {
        self.dir_user_defined_name = name.into();
        self
    }

    /// Place the store somewhere other than `{home}/.spacenet`.
    #[must_use]
    pub fn with_store_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.store_dir_override = Some(dir.into());
        self
    }

    pub fn set_modified_only(&mut self, modified_only: bool) -> &mut Self {
        self.modified_only = modified_only;
        self
    }

    #[must_use]
    pub fn dir_path_name(&self) -> &Utf8Path {
        &self.dir_path_name
    }

    #[must_use]
    pub fn dir_user_defined_name(&self) -> &str {
        &self.dir_user_defined_name
    }

    /// Full store path; available after [`run`](Self::run) or
    /// [`reindex_once`](Self::reindex_once).
    #[must_use]
    pub fn db_path_name(&self) -> Option<&Utf8Path> {
        self.db_path_name.as_deref()
    }

    /// Message of the last failed cycle, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Resolve the store location and spawn the worker. A no-op when the
    /// worker is already running.
    pub fn run(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let db_path_name = self.prepare_store_path()?;
        self.shutdown_flag.store(false, Ordering::Relaxed);

        let (wake_tx, wake_rx) = bounded::<()>(1);
        let ctx = WorkerContext {
            dir_path_name: self.dir_path_name.clone(),
            db_path_name: db_path_name.clone(),
            modified_only: self.modified_only,
            shutdown: self.shutdown_flag.clone(),
            error: self.error.clone(),
            wake_rx,
        };

        let handle = std::thread::Builder::new()
            .name(String::from("spacenet-tracker"))
            .spawn(move || worker(ctx))
            .map_err(|e| anyhow_loc!("failed to spawn tracker worker: {e}"))?;

        info!(root = %self.dir_path_name, store = %db_path_name, "tracker started");
        self.wake_tx = Some(wake_tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// Raise the cancellation flag, wake the worker, and join it.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        self.shutdown_flag.store(true, Ordering::Relaxed);
        if let Some(wake_tx) = self.wake_tx.take() {
            let _ = wake_tx.try_send(());
        }
        if handle.join().is_err() {
            warn!("tracker worker panicked");
        }
        info!(root = %self.dir_path_name, "tracker stopped");
    }

    /// Run a single synchronous reindex cycle against the derived store.
    pub fn reindex_once(&mut self) -> Result<()> {
        let db_path_name = self.prepare_store_path()?;
        let mut db = connect(&db_path_name)?;
        let mut indexer = DirectoryIndexer::new();
        indexer.set_modified_only(self.modified_only);
        indexer.reindex(&mut db, &self.dir_path_name, None)
    }

    fn prepare_store_path(&mut self) -> Result<Utf8PathBuf> {
        let store_dir = match &self.store_dir_override {
            Some(dir) => dir.clone(),
            None => home_path(false)?.join(STORE_DIR_NAME),
        };
        mkdir(&store_dir)?;

        let source = if self.dir_user_defined_name.is_empty() {
            self.dir_path_name.as_str()
        } else {
            &self.dir_user_defined_name
        };
        let db_path_name = store_dir.join(format!("{}.sqlite", derived_db_name(source)));
        self.db_path_name = Some(db_path_name.clone());
        Ok(db_path_name)
    }
}

impl Drop for DirectoryTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stable, filename-safe store name for a tracked root.
///
/// Characters outside `[A-Za-z0-9._-]` are stripped; if that changed the
/// name, a 13-character prefix plus the CDC-512 short-string of the original
/// keeps distinct roots from colliding.
pub(crate) fn derived_db_name(source: &str) -> String {
    let sanitized = sanitize_name(source);
    if sanitized == source {
        return sanitized;
    }

    let mut prefix = sanitized;
    prefix.truncate(13);
    let short = Cdc512::digest_of(source.as_bytes()).to_short_string();
    format!("{prefix}-{short}")
}

fn worker(ctx: WorkerContext) {
    let mut db: Option<Connection> = None;
    let mut indexer = DirectoryIndexer::new();
    indexer.set_modified_only(ctx.modified_only);

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }

        if let Err(e) = run_cycle(&mut db, &ctx, &indexer) {
            warn!(root = %ctx.dir_path_name, error = %e, "reindex cycle failed");
            *ctx.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
            // Drop the connection so the next cycle reconnects fresh.
            db = None;
        }

        match ctx.wake_rx.recv_timeout(CYCLE_PERIOD) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    debug!(root = %ctx.dir_path_name, "tracker worker exiting");
}

fn run_cycle(
    db: &mut Option<Connection>,
    ctx: &WorkerContext,
    indexer: &DirectoryIndexer,
) -> Result<()> {
    if db.is_none() {
        *db = Some(connect(&ctx.db_path_name)?);
    }
    let conn = db
        .as_mut()
        .ok_or_else(|| anyhow_loc!("store connection unavailable"))?;

    indexer.reindex(conn, &ctx.dir_path_name, Some(ctx.shutdown.clone()))
}

/// Open the store and apply the connect-time pragmas.
fn connect(db_path_name: &Utf8Path) -> Result<Connection> {
    let conn = Connection::open(db_path_name)?;

    conn.pragma_update(None, "page_size", 4096)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "count_changes", "OFF")?;
    conn.pragma_update(None, "auto_vacuum", "NONE")?;
    conn.pragma_update(None, "cache_size", -2048)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    debug!(store = %db_path_name, "store connected");
    Ok(conn)
}
