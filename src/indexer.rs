//! Reconciliation engine: drives the directory walker over a tracked root
//! and maintains the `entries` / `blocks_digests` tables.
//!
//! Each cycle is a mark-and-sweep pass. `is_alive = 0` means "observed this
//! cycle"; `is_alive = 1` means "stale". Every row visited during the walk
//! is cleared to observed; at cycle end still-stale rows (and their block
//! rows) are deleted and all survivors are re-marked stale for the next
//! cycle.
//!
//! Per-entry writes run under autocommit; only the final sweep takes an
//! explicit (immediate) transaction. A failed cycle propagates before the
//! sweep, leaving liveness state untouched so the next successful cycle
//! reconciles with correct semantics.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::bail_loc;
use crate::cdc512::Cdc512;
use crate::dir_reader::{DirectoryReader, EntryInfo};

/// File hashing granularity in bytes. Persisted per entry as `block_size`;
/// changing it invalidates stored block digests.
pub const BLOCK_SIZE: usize = 4096;

const SCHEMA_DDL: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        is_alive        INTEGER NOT NULL,   /* 0 = observed this cycle, 1 = stale */
        parent_id       INTEGER NOT NULL,   /* entries rowid; 0 for roots */
        name            TEXT NOT NULL,      /* leaf name, UTF-8 */
        is_dir          INTEGER,
        mtime           INTEGER,            /* unix seconds * 1e9 + nanoseconds */
        file_size       INTEGER,
        block_size      INTEGER,
        digest          BLOB,               /* whole-file CDC-512 */
        UNIQUE(parent_id, name) ON CONFLICT ABORT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS i1 ON entries (parent_id, name);
    CREATE INDEX IF NOT EXISTS i2 ON entries (is_alive);

    CREATE TABLE IF NOT EXISTS blocks_digests (
        entry_id        INTEGER NOT NULL,   /* entries rowid */
        block_no        INTEGER NOT NULL,   /* 1-based */
        digest          BLOB,               /* per-block CDC-512 */
        UNIQUE(entry_id, block_no) ON CONFLICT ABORT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS i3 ON blocks_digests (entry_id, block_no);
";

/// Drives reindex cycles against one store.
pub struct DirectoryIndexer {
    modified_only: bool,
}

impl Default for DirectoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryIndexer {
    #[must_use]
    pub fn new() -> Self {
        Self { modified_only: true }
    }

    /// Whether unchanged files (by mtime) skip digest recomputation.
    #[must_use]
    pub fn modified_only(&self) -> bool {
        self.modified_only
    }

    pub fn set_modified_only(&mut self, modified_only: bool) -> &mut Self {
        self.modified_only = modified_only;
        self
    }

    /// Run one full cycle: schema check, walk, sweep.
    ///
    /// `shutdown` cancels the walk cooperatively; a cancelled cycle still
    /// sweeps, so rows observed before cancellation stay consistent.
    pub fn reindex(
        &self,
        db: &mut Connection,
        dir_path_name: &Utf8Path,
        shutdown: Option<Arc<AtomicBool>>,
    ) -> Result<()> {
        db.execute_batch(SCHEMA_DDL)?;

        let mut visited: u64 = 0;
        {
            let mut pass = ReindexPass {
                db,
                modified_only: self.modified_only,
                parents: HashMap::new(),
            };

            let reader = DirectoryReader {
                recursive: true,
                list_directories: true,
                abort: shutdown,
                ..Default::default()
            };

            reader.read(dir_path_name, |entry| {
                visited += 1;
                pass.visit(entry)
            })?;
        }

        sweep(db)?;
        debug!(root = %dir_path_name, visited, "reindex cycle complete");
        Ok(())
    }
}

/// Mutable state for one cycle.
struct ReindexPass<'c> {
    db: &'c Connection,
    modified_only: bool,
    /// UTF-8 directory path -> entries rowid, filled as directories are
    /// observed. The walker lists a directory before descending, so lookups
    /// by the immediate parent path can only miss at the root.
    parents: HashMap<Utf8PathBuf, i64>,
}

impl ReindexPass<'_> {
    fn visit(&mut self, entry: &EntryInfo) -> Result<()> {
        // Entries we cannot read are neither inserted nor touched; their
        // stale rows are reaped by the sweep.
        if !is_accessible(&entry.path_name, entry.is_dir) {
            return Ok(());
        }

        let parent_id = match self.parents.get(entry.path.as_path()) {
            Some(id) => *id,
            None => {
                if entry.level > 1 {
                    bail_loc!("parent row missing for {}", entry.path);
                }
                let (root_id, _) = self.update_entry(0, entry.path.as_str(), true, 0, 0, 0)?;
                self.parents.insert(entry.path.clone(), root_id);
                root_id
            }
        };

        // Directories carry no observed mtime (their row mtime stays NULL),
        // so an unchanged directory is a pure liveness touch.
        let (observed_mtime, file_size, block_size) = if entry.is_dir {
            (0, 0, 0)
        } else {
            (
                entry.mtime * 1_000_000_000 + i64::from(entry.mtime_ns),
                entry.fsize,
                BLOCK_SIZE as u64,
            )
        };

        let (entry_id, stored_mtime) = self.update_entry(
            parent_id,
            &entry.name,
            entry.is_dir,
            observed_mtime,
            file_size,
            block_size,
        )?;

        if entry.is_dir {
            self.parents.insert(entry.path_name.clone(), entry_id);
        }

        if entry.is_reg && (!self.modified_only || stored_mtime != observed_mtime) {
            self.update_blocks(entry_id, &entry.path_name, observed_mtime)?;
        }

        Ok(())
    }

    /// Insert-or-update an entries row keyed by `(parent_id, name)` and
    /// clear its liveness mark.
    ///
    /// Returns `(rowid, mtime stored before this cycle)`; the mtime is 0 when
    /// the row is new or never hashed. When the row exists with an unchanged
    /// mtime (or `mtime` is 0, i.e. a directory/root), only the liveness
    /// mark is touched and the stored digest state is left alone.
    fn update_entry(
        &mut self,
        parent_id: i64,
        name: &str,
        is_dir: bool,
        mtime: i64,
        file_size: u64,
        block_size: u64,
    ) -> Result<(i64, i64)> {
        let (mut id, stored_mtime) = self.select_entry(parent_id, name)?;

        if self.modified_only && id != 0 && (stored_mtime == mtime || mtime == 0) {
            let mut touch = self
                .db
                .prepare_cached("UPDATE entries SET is_alive = 0 WHERE rowid = ?1")?;
            touch.execute(params![id])?;
        } else {
            let is_dir_col = if is_dir { Some(1i64) } else { None };
            let file_size_col = if file_size == 0 { None } else { Some(file_size as i64) };
            let block_size_col = if block_size == 0 { None } else { Some(block_size as i64) };

            let mut insert = self.db.prepare_cached(
                "INSERT INTO entries (
                    is_alive, parent_id, name, is_dir, mtime, file_size, block_size, digest
                ) VALUES (0, ?1, ?2, ?3, NULL, ?4, ?5, NULL)",
            )?;
            let inserted = insert.execute(params![parent_id, name, is_dir_col, file_size_col, block_size_col]);

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    // Row appeared since the select (or mtime changed): fall
                    // back to a full update. The stored mtime is deliberately
                    // not overwritten here; the post-hash update records the
                    // mtime that matches the digest.
                    let mut update = self.db.prepare_cached(
                        "UPDATE entries SET
                            is_alive = 0,
                            is_dir = ?3,
                            file_size = ?4,
                            block_size = ?5,
                            digest = NULL
                        WHERE parent_id = ?1 AND name = ?2",
                    )?;
                    update.execute(params![parent_id, name, is_dir_col, file_size_col, block_size_col])?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if id == 0 {
            (id, _) = self.select_entry(parent_id, name)?;
            if id == 0 {
                bail_loc!("entries row vanished for parent {parent_id}, name {name:?}");
            }
        }

        Ok((id, stored_mtime))
    }

    fn select_entry(&self, parent_id: i64, name: &str) -> Result<(i64, i64)> {
        let mut select = self
            .db
            .prepare_cached("SELECT rowid, mtime FROM entries WHERE parent_id = ?1 AND name = ?2")?;
        let row = select
            .query_row(params![parent_id, name], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?.unwrap_or(0)))
            })
            .optional()?;
        Ok(row.unwrap_or((0, 0)))
    }

    /// Hash `path_name` block by block, maintaining the per-block digest
    /// vector and the running whole-file digest, then record the digest and
    /// the mtime it corresponds to.
    ///
    /// An open failure is a silent skip (the access pre-check already
    /// filters the common case; anything else is a race with deletion and
    /// the sweep will reconcile). A read failure mid-file aborts the cycle.
    fn update_blocks(&self, entry_id: i64, path_name: &Utf8Path, mtime: i64) -> Result<()> {
        let mut file = match File::open(path_name) {
            Ok(file) => file,
            Err(_) => return Ok(()),
        };

        let mut file_ctx = Cdc512::new();
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut block_no: i64 = 0;

        loop {
            let filled = read_block(&mut file, &mut buf)
                .map_err(|e| crate::anyhow_loc!("failed to read file {path_name}: {e}"))?;
            if filled == 0 {
                break;
            }
            block_no += 1;
            buf[filled..].fill(0);

            let block_digest = Cdc512::digest_of(&buf);
            self.upsert_block(entry_id, block_no, block_digest.as_bytes())?;
            file_ctx.update(&buf);
        }

        // Truncate residue from a previously longer version of the file.
        let mut tail_delete = self
            .db
            .prepare_cached("DELETE FROM blocks_digests WHERE entry_id = ?1 AND block_no > ?2")?;
        tail_delete.execute(params![entry_id, block_no])?;

        let digest = file_ctx.finish();
        let mut post_hash = self.db.prepare_cached(
            "UPDATE entries SET is_alive = 0, mtime = ?2, digest = ?3 WHERE rowid = ?1",
        )?;
        post_hash.execute(params![entry_id, mtime, digest.as_bytes().as_slice()])?;

        Ok(())
    }

    fn upsert_block(&self, entry_id: i64, block_no: i64, digest: &[u8]) -> Result<()> {
        let mut insert = self.db.prepare_cached(
            "INSERT INTO blocks_digests (entry_id, block_no, digest) VALUES (?1, ?2, ?3)",
        )?;
        match insert.execute(params![entry_id, block_no, digest]) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                let mut update = self.db.prepare_cached(
                    "UPDATE blocks_digests SET digest = ?3 WHERE entry_id = ?1 AND block_no = ?2",
                )?;
                update.execute(params![entry_id, block_no, digest])?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Liveness sweep: one immediate transaction deleting still-stale rows with
/// their block rows, then re-marking every survivor stale for the next
/// cycle.
fn sweep(db: &mut Connection) -> Result<()> {
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let dead_blocks = tx.execute(
        "DELETE FROM blocks_digests WHERE entry_id IN (
            SELECT rowid FROM entries WHERE is_alive <> 0
        )",
        [],
    )?;
    let dead_entries = tx.execute("DELETE FROM entries WHERE is_alive <> 0", [])?;
    tx.execute("UPDATE entries SET is_alive = 1", [])?;

    tx.commit()?;
    debug!(dead_entries, dead_blocks, "liveness sweep complete");
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Fill `buf` from `file`, short only at EOF. Retries on interruption.
fn read_block(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read permission is required for every entry, execute additionally for
/// directories. Checked with `access(2)` where available.
#[cfg(unix)]
fn is_accessible(path: &Utf8Path, is_dir: bool) -> bool {
    let Ok(c_path) = std::ffi::CString::new(path.as_str()) else {
        return false;
    };
    let mode = libc::R_OK | if is_dir { libc::X_OK } else { 0 };
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
fn is_accessible(path: &Utf8Path, is_dir: bool) -> bool {
    let _ = is_dir;
    std::fs::metadata(path).is_ok()
}
