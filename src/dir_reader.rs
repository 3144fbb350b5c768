//! Explicit-stack depth-first directory walker.
//!
//! Enumerates a root directory and invokes a callback for each entry with a
//! complete stat tuple. Recursion is expressed as an explicit stack of
//! `(ReadDir, path)` frames so every open directory handle is released
//! deterministically on all exit paths, including errors and cancellation.
//!
//! A nonexistent root (or a root that is not a directory) is a benign empty
//! walk. Every other open/read/stat failure is fatal and carries the
//! offending path.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::pathutil::PATH_DELIMITER;
use crate::{anyhow_loc, bail_loc};

/// Walker configuration. Field defaults match a plain non-recursive listing
/// of regular files.
pub struct DirectoryReader {
    /// Regex the leaf name must fully match. Empty means `.*`.
    pub mask: String,
    /// Regex that, when non-empty and fully matching the leaf name, drops
    /// the entry.
    pub exclude: String,
    pub list_dot: bool,
    pub list_dotdot: bool,
    pub list_directories: bool,
    pub recursive: bool,
    /// Depth cap for descent; `0` = unlimited. Entries directly under the
    /// root are at level 1.
    pub max_level: usize,
    /// Cooperative cancellation flag, consulted on each loop iteration and
    /// before each callback.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for DirectoryReader {
    fn default() -> Self {
        Self {
            mask: String::from(".*"),
            exclude: String::new(),
            list_dot: false,
            list_dotdot: false,
            list_directories: false,
            recursive: false,
            max_level: 0,
            abort: None,
        }
    }
}

/// Stat tuple for the currently-yielded entry.
#[derive(Clone, Debug)]
pub struct EntryInfo {
    /// Directory containing the entry.
    pub path: Utf8PathBuf,
    /// Full path of the entry.
    pub path_name: Utf8PathBuf,
    /// Leaf name.
    pub name: String,
    /// Depth below the root; 1 for entries directly under it.
    pub level: usize,
    /// Byte length as reported by lstat.
    pub fsize: u64,
    pub is_reg: bool,
    pub is_dir: bool,
    pub is_lnk: bool,
    pub atime: i64,
    pub atime_ns: u32,
    pub ctime: i64,
    pub ctime_ns: u32,
    pub mtime: i64,
    pub mtime_ns: u32,
}

impl EntryInfo {
    fn new(
        path: &Utf8Path,
        path_name: Utf8PathBuf,
        name: String,
        level: usize,
        md: &fs::Metadata,
    ) -> Self {
        let times = stat_times(md);
        let ft = md.file_type();
        EntryInfo {
            path: path.to_owned(),
            path_name,
            name,
            level,
            fsize: md.len(),
            is_reg: ft.is_file(),
            is_dir: ft.is_dir(),
            is_lnk: ft.is_symlink(),
            atime: times.atime,
            atime_ns: times.atime_ns,
            ctime: times.ctime,
            ctime_ns: times.ctime_ns,
            mtime: times.mtime,
            mtime_ns: times.mtime_ns,
        }
    }
}

impl DirectoryReader {
    /// Walk `root_path`, calling `manipulator` for each matching entry.
    ///
    /// Directories are listed (subject to `list_directories` and the mask)
    /// before their contents. An error returned by the callback aborts the
    /// walk and propagates.
    pub fn read<F>(&self, root_path: &Utf8Path, mut manipulator: F) -> Result<()>
    where
        F: FnMut(&EntryInfo) -> Result<()>,
    {
        let mask = full_match_regex(if self.mask.is_empty() { ".*" } else { &self.mask })?;
        let exclude = if self.exclude.is_empty() {
            None
        } else {
            Some(full_match_regex(&self.exclude)?)
        };
        let matched =
            |name: &str| mask.is_match(name) && exclude.as_ref().is_none_or(|ex| !ex.is_match(name));

        let mut path = trim_trailing_sep(root_path);
        let mut iter = match fs::read_dir(&path) {
            Ok(iter) => iter,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(());
            }
            Err(e) => return Err(open_error(&path, &e)),
        };

        let mut stack: Vec<(fs::ReadDir, Utf8PathBuf)> = Vec::new();
        let mut just_opened = true;

        loop {
            if self.aborted() {
                break;
            }

            if just_opened {
                just_opened = false;
                self.emit_dot_entries(&path, stack.len() + 1, &matched, &mut manipulator)?;
            }

            let entry = match iter.next() {
                None => match stack.pop() {
                    Some((parent_iter, parent_path)) => {
                        iter = parent_iter;
                        path = parent_path;
                        continue;
                    }
                    None => break,
                },
                Some(Err(e)) => {
                    bail_loc!(
                        "failed to read directory {path}: {e} (os error {})",
                        os_code(&e)
                    )
                }
                Some(Ok(entry)) => entry,
            };

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => bail_loc!("non-UTF-8 entry name {raw:?} in {path}"),
            };
            if name.is_empty() {
                continue;
            }

            let level = stack.len() + 1;
            let path_name = path.join(&name);
            let md = fs::symlink_metadata(&path_name).map_err(|e| {
                anyhow_loc!(
                    "failed to stat entry {path_name}: {e} (os error {})",
                    os_code(&e)
                )
            })?;
            let info = EntryInfo::new(&path, path_name, name, level, &md);

            if info.is_dir {
                if self.list_directories && matched(&info.name) {
                    if self.aborted() {
                        break;
                    }
                    manipulator(&info)?;
                }
                if self.recursive && (self.max_level == 0 || stack.len() < self.max_level) {
                    let child = fs::read_dir(&info.path_name).map_err(|e| {
                        anyhow_loc!(
                            "failed to open directory {}: {e} (os error {})",
                            info.path_name,
                            os_code(&e)
                        )
                    })?;
                    stack.push((iter, path));
                    iter = child;
                    path = info.path_name;
                    just_opened = true;
                }
            } else if matched(&info.name) {
                if self.aborted() {
                    break;
                }
                manipulator(&info)?;
            }
        }

        Ok(())
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// `read_dir` never yields `.`/`..`; synthesize them when requested so
    /// the flags keep their readdir-era meaning.
    fn emit_dot_entries<F>(
        &self,
        path: &Utf8Path,
        level: usize,
        matched: &impl Fn(&str) -> bool,
        manipulator: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&EntryInfo) -> Result<()>,
    {
        if !self.list_dot && !self.list_dotdot {
            return Ok(());
        }

        let mut emit = |name: &str, target: &Utf8Path| -> Result<()> {
            if !matched(name) {
                return Ok(());
            }
            let md = fs::symlink_metadata(target).map_err(|e| {
                anyhow_loc!("failed to stat entry {target}: {e} (os error {})", os_code(&e))
            })?;
            let info = EntryInfo::new(path, path.join(name), name.to_string(), level, &md);
            manipulator(&info)
        };

        if self.list_dot {
            emit(".", path)?;
        }
        if self.list_dotdot {
            emit("..", path.parent().unwrap_or(path))?;
        }
        Ok(())
    }
}

/// The original enumeration applied whole-name matching; wrap the pattern so
/// `is_match` does too.
fn full_match_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| anyhow_loc!("invalid filter pattern {pattern:?}: {e}"))
}

fn trim_trailing_sep(path: &Utf8Path) -> Utf8PathBuf {
    let s = path.as_str();
    if s.len() > 1 && s.ends_with(PATH_DELIMITER) {
        Utf8PathBuf::from(&s[..s.len() - 1])
    } else {
        path.to_owned()
    }
}

fn open_error(path: &Utf8Path, e: &io::Error) -> anyhow::Error {
    anyhow_loc!("failed to open directory {path}: {e} (os error {})", os_code(e))
}

fn os_code(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(0)
}

struct StatTimes {
    atime: i64,
    atime_ns: u32,
    ctime: i64,
    ctime_ns: u32,
    mtime: i64,
    mtime_ns: u32,
}

#[cfg(unix)]
fn stat_times(md: &fs::Metadata) -> StatTimes {
    use std::os::unix::fs::MetadataExt;
    StatTimes {
        atime: md.atime(),
        atime_ns: md.atime_nsec() as u32,
        ctime: md.ctime(),
        ctime_ns: md.ctime_nsec() as u32,
        mtime: md.mtime(),
        mtime_ns: md.mtime_nsec() as u32,
    }
}

#[cfg(windows)]
fn stat_times(md: &fs::Metadata) -> StatTimes {
    use std::os::windows::fs::MetadataExt;

    // FILETIME: 100-ns intervals since 1601-01-01.
    const SECS_1601_TO_1970: i64 = 11_644_473_600;

    fn split(filetime: u64) -> (i64, u32) {
        let nsec = ((filetime % 10_000_000) * 100) as u32;
        let sec = (filetime / 10_000_000) as i64 - SECS_1601_TO_1970;
        (sec, nsec)
    }

    let (atime, atime_ns) = split(md.last_access_time());
    let (ctime, ctime_ns) = split(md.creation_time());
    let (mtime, mtime_ns) = split(md.last_write_time());
    StatTimes {
        atime,
        atime_ns,
        ctime,
        ctime_ns,
        mtime,
        mtime_ns,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
